//! Text generation through an OpenAI-compatible chat completions API.
//!
//! SiliconFlow, DeepSeek, OpenAI and local servers such as Ollama all speak
//! the same `/chat/completions` shape.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;

/// Turns one instruction document into one generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct ChatCompletionClient {
    config: LlmConfig,
    api_key: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build LLM HTTP client")?;
        let api_key = config.resolve_api_key();

        Ok(Self {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "no LLM API key (set {} or llm.api_key)",
                self.config.api_key_env
            )
        })?;

        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.config.temperature,
            "stream": false
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(
            "Sending {} char prompt to model '{}'",
            prompt.chars().count(),
            self.config.model
        );

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
            bail!("LLM returned status {status}: {}", detail.trim());
        }

        let data: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            bail!("LLM returned an empty completion");
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_an_error_not_a_panic() {
        let config = LlmConfig {
            api_key: None,
            api_key_env: "DAILY_PODCAST_TEST_NO_SUCH_KEY".into(),
            ..Default::default()
        };
        let client = ChatCompletionClient::new(config).unwrap();
        let err = client.generate("hello").await.unwrap_err();
        assert!(err.to_string().contains("DAILY_PODCAST_TEST_NO_SUCH_KEY"));
    }

    #[test]
    fn parses_completion_shape() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"  早上好  "}}]}"#;
        let data: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(data.choices[0].message.content.as_deref(), Some("  早上好  "));
    }
}
