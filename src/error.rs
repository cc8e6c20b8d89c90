use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider returned no choices")]
    EmptyChoices,

    #[error("Completion requires at least one message")]
    EmptyMessages,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AssistantError {
    /// Whether a retry could plausibly succeed. Client errors other than
    /// rate limiting are not worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            AssistantError::Http(_) | AssistantError::Stream(_) => true,
            AssistantError::Api { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}
