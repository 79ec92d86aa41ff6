//! Script composition: digest → prompt → model → spoken-style script.
//!
//! Never fails. An empty digest or any generation error yields a fixed
//! apology script so the run can still publish an episode.

use std::time::Instant;

use tracing::{info, warn};

use crate::aggregator::Digest;
use crate::config::{PodcastConfig, ScriptConfig};
use crate::llm::TextGenerator;
use crate::sanitize::sanitize;

pub const EMPTY_DIGEST_SCRIPT: &str =
    "大家好，抱歉，今天暂时没有抓取到新的资讯。我们明天同一时间再见，祝你一路顺风。";

pub const GENERATION_FAILED_SCRIPT: &str =
    "大家好，抱歉，今天的节目稿件生成遇到了一点问题，暂时无法为你播报。我们明天同一时间再见，祝你一路顺风。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOrigin {
    Generated,
    EmptyDigest,
    GenerationFailed,
}

impl ScriptOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::EmptyDigest => "empty-digest",
            Self::GenerationFailed => "generation-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub text: String,
    pub origin: ScriptOrigin,
}

impl Script {
    fn fallback(origin: ScriptOrigin) -> Self {
        let text = match origin {
            ScriptOrigin::EmptyDigest => EMPTY_DIGEST_SCRIPT,
            _ => GENERATION_FAILED_SCRIPT,
        };
        Self {
            text: text.to_string(),
            origin,
        }
    }
}

pub struct Composer<'a> {
    script: &'a ScriptConfig,
    podcast: &'a PodcastConfig,
    generator: &'a dyn TextGenerator,
}

impl<'a> Composer<'a> {
    pub fn new(
        script: &'a ScriptConfig,
        podcast: &'a PodcastConfig,
        generator: &'a dyn TextGenerator,
    ) -> Self {
        Self {
            script,
            podcast,
            generator,
        }
    }

    pub async fn compose(&self, digest: &Digest) -> Script {
        if digest.is_empty() {
            warn!("Empty digest, using fallback script");
            return Script::fallback(ScriptOrigin::EmptyDigest);
        }

        let prompt = build_prompt(self.script, &self.podcast.name, digest);
        let t_start = Instant::now();

        let raw = match self.generator.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Script generation failed: {e:#}, using fallback script");
                return Script::fallback(ScriptOrigin::GenerationFailed);
            }
        };

        let text = sanitize(&raw);
        if text.is_empty() {
            warn!("Model output was empty after sanitizing, using fallback script");
            return Script::fallback(ScriptOrigin::GenerationFailed);
        }

        info!(
            "Script generated: {} chars raw, {} chars clean ({:.0}ms)",
            raw.chars().count(),
            text.chars().count(),
            t_start.elapsed().as_secs_f64() * 1000.0
        );
        Script {
            text,
            origin: ScriptOrigin::Generated,
        }
    }
}

/// Build the single instruction document sent to the model.
pub fn build_prompt(script: &ScriptConfig, podcast_name: &str, digest: &Digest) -> String {
    let target = script.target_chars();
    let minutes = script.desired_minutes;

    format!(
        r#"你是播客《{podcast_name}》的资深主持人，每天早上为通勤路上的听众播报科技与商业资讯。请把下面的资讯改写成一篇可以直接朗读的口语化播报稿。

篇幅要求：
全文约 {target} 字，朗读时长约 {minutes} 分钟。

结构要求：
1. 开场：简短问候，用一两句话点出今天最值得关注的话题。
2. 深度解读：挑选最重要的 2 到 3 条资讯，讲清楚发生了什么、为什么重要、对普通人有什么影响。
3. 快讯速览：用轻快的节奏把其余资讯逐条带过，每条一到两句话，条与条之间自然过渡。
4. 结尾：总结今天的内容，并给听众一个实用的小建议，然后道别。

禁止事项：
- 不要使用任何 Markdown 格式，不要出现星号、井号等强调或标题符号。
- 不要输出 [文字](链接) 形式的超链接，也不要念出网址。
- 不要使用列表符号或编号开头的条目。
- 不要在句首加“主持人：”之类的说话人名字。
- 不要写（音乐）、[笑声] 这类括号里的舞台提示。
- 不要输出“标题：”或 “title:” 之类的标签，也不要给全文加标题。
- 不要出现“下面是第一条新闻”这种机械的串场词。

只输出要朗读的纯文本。

资讯内容：
{}"#,
        digest.text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rss::Entry;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(reply: &'static str) -> Self {
            Self {
                reply: Some(reply),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(r) => Ok(r.to_string()),
                None => bail!("quota exceeded"),
            }
        }
    }

    fn digest() -> Digest {
        let entry = Entry {
            title: "芯片新品发布".into(),
            summary: Some("<p>性能提升 30%</p>".into()),
        };
        let mut d = Digest::default();
        d.push(crate::aggregator::format_entry(&entry, 150));
        d
    }

    #[tokio::test]
    async fn empty_digest_skips_the_model() {
        let gen = Canned::ok("unused");
        let (s, p) = (ScriptConfig::default(), PodcastConfig::default());
        let script = Composer::new(&s, &p, &gen).compose(&Digest::default()).await;

        assert_eq!(script.text, EMPTY_DIGEST_SCRIPT);
        assert_eq!(script.origin, ScriptOrigin::EmptyDigest);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generation_failure_falls_back() {
        let gen = Canned::failing();
        let (s, p) = (ScriptConfig::default(), PodcastConfig::default());
        let script = Composer::new(&s, &p, &gen).compose(&digest()).await;

        assert_eq!(script.text, GENERATION_FAILED_SCRIPT);
        assert_eq!(script.origin, ScriptOrigin::GenerationFailed);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn markup_only_output_falls_back() {
        let gen = Canned::ok("**\n\n## \n- ");
        let (s, p) = (ScriptConfig::default(), PodcastConfig::default());
        let script = Composer::new(&s, &p, &gen).compose(&digest()).await;
        assert_eq!(script.origin, ScriptOrigin::GenerationFailed);
    }

    #[tokio::test]
    async fn generated_output_is_sanitized() {
        let gen = Canned::ok("主持人：**早上好**！\n\n\n\n- 今天聊聊[芯片](https://x.y)。");
        let (s, p) = (ScriptConfig::default(), PodcastConfig::default());
        let script = Composer::new(&s, &p, &gen).compose(&digest()).await;

        assert_eq!(script.origin, ScriptOrigin::Generated);
        assert_eq!(script.text, "早上好！\n\n今天聊聊芯片。");
    }

    #[test]
    fn prompt_carries_length_outline_and_material() {
        let s = ScriptConfig {
            desired_minutes: 12,
            words_per_minute: 250,
        };
        let prompt = build_prompt(&s, "测试早报", &digest());

        assert!(prompt.contains("《测试早报》"));
        assert!(prompt.contains("约 3000 字"));
        assert!(prompt.contains("约 12 分钟"));
        assert!(prompt.contains("开场"));
        assert!(prompt.contains("2 到 3 条"));
        assert!(prompt.contains("快讯速览"));
        assert!(prompt.contains("实用的小建议"));
        assert!(prompt.contains("Markdown"));
        assert!(prompt.contains("title:"));
        assert!(prompt.trim_end().ends_with("标题：芯片新品发布\n内容：性能提升 30%"));
    }
}
