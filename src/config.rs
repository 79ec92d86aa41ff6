//! Configuration management for daily-podcast-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so an empty or missing file still yields a runnable pipeline
//! (apart from the LLM credential, which comes from the environment).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub urls: Vec<String>,
    pub entries_per_source: usize,
    pub summary_max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            urls: vec![
                "https://www.36kr.com/feed".into(),
                "https://sspai.com/feed".into(),
            ],
            entries_per_source: 2,
            summary_max_chars: 150,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Explicit credential. Leave unset and use `api_key_env` instead.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1".into(),
            model: "deepseek-ai/DeepSeek-V3".into(),
            api_key: None,
            api_key_env: "SILICON_KEY".into(),
            temperature: 0.7,
            timeout_secs: 180,
        }
    }
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub desired_minutes: u32,
    pub words_per_minute: u32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            desired_minutes: 10,
            words_per_minute: 250,
        }
    }
}

impl ScriptConfig {
    pub fn target_chars(&self) -> u32 {
        self.desired_minutes * self.words_per_minute
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TtsBackend {
    EdgeTts,
    SpeechApi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub backend: TtsBackend,
    pub voice: String,
    /// edge-tts rate adjustment, e.g. "+10%".
    pub rate: Option<String>,
    pub command: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::EdgeTts,
            voice: "zh-CN-YunxiNeural".into(),
            rate: None,
            command: "edge-tts".into(),
            base_url: "https://api.siliconflow.cn/v1".into(),
            model: "FunAudioLLM/CosyVoice2-0.5B".into(),
            api_key: None,
            api_key_env: "SILICON_KEY".into(),
            timeout_secs: 600,
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodcastConfig {
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub feed_file: String,
    pub max_episodes: usize,
    pub enclosure_length: u64,
    pub utc_offset_hours: i32,
    pub episode_title_suffix: String,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            name: "我的车载早报".into(),
            description: "AI Generated Podcast".into(),
            base_url: "https://example.github.io/my-daily-podcast".into(),
            output_dir: PathBuf::from("."),
            feed_file: "feed.xml".into(),
            max_episodes: 5,
            enclosure_length: 1_000_000,
            utc_offset_hours: 8,
            episode_title_suffix: "早间新闻".into(),
        }
    }
}

impl PodcastConfig {
    pub fn feed_path(&self) -> PathBuf {
        self.output_dir.join(&self.feed_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Empty means `~/.daily-podcast-history`.
    pub dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: String::new(),
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        if self.dir.is_empty() {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".daily-podcast-history")
        } else {
            PathBuf::from(&self.dir)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub llm: LlmConfig,
    pub script: ScriptConfig,
    pub tts: TtsConfig,
    pub podcast: PodcastConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/daily-podcast/config.yaml
    /// 3. /etc/daily-podcast/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/daily-podcast/config.yaml")),
                Some(PathBuf::from("/etc/daily-podcast/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        // An empty document deserializes to unit, not to a struct.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(contents)
    }
}

fn resolve_key(explicit: Option<&str>, env_name: &str) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(env_name).ok())
        .filter(|k| !k.trim().is_empty())
}
