use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PerspectiveError>;

#[derive(Debug, Error)]
pub enum PerspectiveError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PerspectiveError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PerspectiveError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for PerspectiveError {
    fn from(err: reqwest::Error) -> Self {
        PerspectiveError::Network(err.to_string())
    }
}
