use thiserror::Error;

/// Failures that stop a profile save or a turn before it is appended.
///
/// Oracle problems are not here: they are recovered inside the turn and
/// reported on the outcome instead.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("profile store unavailable: {0}")]
    StoreUnavailable(String),
}

impl TurnError {
    pub fn validation(message: impl Into<String>) -> Self {
        TurnError::Validation(message.into())
    }

    pub fn store(error: anyhow::Error) -> Self {
        TurnError::StoreUnavailable(format!("{:#}", error))
    }

    /// Store outages are worth retrying; bad input is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TurnError::StoreUnavailable(_))
    }
}
