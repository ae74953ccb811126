use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, YouTubeError>;

#[derive(Debug, Error)]
pub enum YouTubeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}, reason {reason}): {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },

    /// HTTP 429, or 403 with reason `rateLimitExceeded` / `userRateLimitExceeded`.
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Daily quota spent. Waiting a few seconds won't help.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl YouTubeError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, YouTubeError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for YouTubeError {
    fn from(err: reqwest::Error) -> Self {
        YouTubeError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for YouTubeError {
    fn from(err: serde_json::Error) -> Self {
        YouTubeError::Parse(err.to_string())
    }
}
