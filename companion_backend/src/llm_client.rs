use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::oracle::{CompletionOracle, OracleFailure};

const MAX_REPLY_TOKENS: u32 = 1024;

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    /// The transport timeout bounds every request made by this client.
    pub fn with_timeout(
        api_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_url,
            api_key,
            model,
            client: build_http_client(timeout)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST one chat-completions request and return the first choice's text.
    pub async fn generate(&self, messages: Vec<Message>, temperature: f32) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(temperature),
            max_tokens: Some(MAX_REPLY_TOKENS),
        };

        let mut request = self.client.post(&endpoint).json(&body);
        // Local servers usually run without a key.
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Completion request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion endpoint answered {}: {}", status, detail.trim());
        }

        let mut completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Completion response was not valid JSON")?;
        if completion.choices.is_empty() {
            anyhow::bail!("Completion response had no choices");
        }
        Ok(completion.choices.swap_remove(0).message.content)
    }
}

/// Build the transport client. System proxy discovery is opt-in through
/// `COMPANION_ENABLE_SYSTEM_PROXY` because it can panic on some platforms.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let use_system_proxy = std::env::var("COMPANION_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let build = |no_proxy: bool| {
        std::panic::catch_unwind(|| {
            let mut builder = reqwest::Client::builder().timeout(timeout);
            if no_proxy {
                builder = builder.no_proxy();
            }
            builder.build()
        })
    };

    if use_system_proxy {
        if let Ok(Ok(client)) = build(false) {
            return Ok(client);
        }
        tracing::warn!("System proxy discovery failed; falling back to a direct HTTP client");
    }

    build(true)
        .map_err(|_| anyhow::anyhow!("HTTP client initialization panicked"))?
        .context("Failed to initialize HTTP client")
}

#[async_trait]
impl CompletionOracle for LlmClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, OracleFailure> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        self.generate(messages, temperature)
            .await
            .map_err(|e| OracleFailure::Request(format!("{:#}", e)))
    }
}
