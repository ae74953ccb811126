//! Maps client errors onto the limiter's throttle / hard-error split.

use std::time::Duration;

use ai_client::AiError;
use counterspeech_engine::CallError;
use perspective_client::PerspectiveError;
use youtube_client::YouTubeError;

pub trait ExternalError: std::fmt::Display {
    /// `Some(retry_after)` when the service asked us to slow down.
    fn throttle(&self) -> Option<Option<Duration>>;

    fn into_call_error(self) -> CallError
    where
        Self: Sized,
    {
        match self.throttle() {
            Some(retry_after) => CallError::Throttled { retry_after },
            None => CallError::rejected(self),
        }
    }
}

impl ExternalError for AiError {
    fn throttle(&self) -> Option<Option<Duration>> {
        match self {
            AiError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl ExternalError for YouTubeError {
    fn throttle(&self) -> Option<Option<Duration>> {
        match self {
            YouTubeError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl ExternalError for PerspectiveError {
    fn throttle(&self) -> Option<Option<Duration>> {
        match self {
            PerspectiveError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// `.into_call()` on a client result, for use inside `RateLimiter::call`.
pub trait IntoCall<T> {
    fn into_call(self) -> Result<T, CallError>;
}

impl<T, E: ExternalError> IntoCall<T> for Result<T, E> {
    fn into_call(self) -> Result<T, CallError> {
        self.map_err(ExternalError::into_call_error)
    }
}
