//! Narration: script text → audio file.
//!
//! Two backends:
//! - `EdgeTtsCli`: runs the `edge-tts` command line tool (free Microsoft voices)
//! - `SpeechApiClient`: OpenAI-compatible `/audio/speech` endpoint
//!
//! Unlike the other stages, a failure here aborts the run.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{TtsBackend, TtsConfig};

/// Writes speech for `text` in `voice` to `output`, replacing any existing file.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()>;
}

pub fn synthesizer_from_config(config: &TtsConfig) -> Result<Box<dyn SpeechSynthesizer>> {
    Ok(match config.backend {
        TtsBackend::EdgeTts => Box::new(EdgeTtsCli::new(config)),
        TtsBackend::SpeechApi => Box::new(SpeechApiClient::new(config)?),
    })
}

pub struct EdgeTtsCli {
    command: String,
    rate: Option<String>,
    timeout: Duration,
}

impl EdgeTtsCli {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            command: config.command.clone(),
            rate: config.rate.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsCli {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(output)
            .kill_on_drop(true);
        if let Some(rate) = &self.rate {
            // edge-tts wants "--rate=-10%", a bare negative value parses as a flag
            cmd.arg(format!("--rate={rate}"));
        }

        debug!("Running {} for {} chars", self.command, text.chars().count());

        let out = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", self.command, self.timeout))?
            .with_context(|| format!("failed to launch {}", self.command))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!("{} exited with {}: {}", self.command, out.status, stderr.trim());
        }
        Ok(())
    }
}

pub struct SpeechApiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    client: Client,
}

impl SpeechApiClient {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build speech HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            api_key_env: config.api_key_env.clone(),
            client,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechApiClient {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no speech API key (set {} or tts.api_key)", self.api_key_env))?;

        let body = json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "mp3"
        });
        let url = format!("{}/audio/speech", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("speech API returned status {status}: {}", detail.trim());
        }

        let audio = resp.bytes().await.context("failed to read speech audio")?;
        tokio::fs::write(output, &audio)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        Ok(())
    }
}

pub struct Narrator<'a> {
    voice: &'a str,
    synthesizer: &'a dyn SpeechSynthesizer,
}

impl<'a> Narrator<'a> {
    pub fn new(voice: &'a str, synthesizer: &'a dyn SpeechSynthesizer) -> Self {
        Self { voice, synthesizer }
    }

    /// Synthesize `text` into `output`. Returns the written file size in bytes.
    pub async fn narrate(&self, text: &str, output: &Path) -> Result<u64> {
        if text.trim().is_empty() {
            bail!("refusing to narrate an empty script");
        }

        let t_start = Instant::now();
        info!("Synthesizing {} chars with voice {}", text.chars().count(), self.voice);

        self.synthesizer
            .synthesize(text, self.voice, output)
            .await
            .context("speech synthesis failed")?;

        let size = tokio::fs::metadata(output)
            .await
            .with_context(|| format!("synthesizer produced no file at {}", output.display()))?
            .len();
        if size == 0 {
            bail!("synthesizer wrote an empty file at {}", output.display());
        }

        info!(
            "Audio written to {} ({size} bytes, {:.1}s)",
            output.display(),
            t_start.elapsed().as_secs_f64()
        );
        Ok(size)
    }
}
