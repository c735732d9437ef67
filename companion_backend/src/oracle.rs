use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Why a completion did not produce usable text. Always recoverable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleFailure {
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion returned no text")]
    EmptyResponse,
}

/// Black-box text completion.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, OracleFailure>;
}

/// Run one completion under a hard deadline and reject blank replies.
pub async fn complete_within(
    oracle: &dyn CompletionOracle,
    prompt: &str,
    temperature: f32,
    timeout: Duration,
) -> Result<String, OracleFailure> {
    let text = match tokio::time::timeout(timeout, oracle.complete(prompt, temperature)).await {
        Ok(result) => result?,
        Err(_) => return Err(OracleFailure::Timeout(timeout)),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(OracleFailure::EmptyResponse);
    }
    Ok(text.to_string())
}
