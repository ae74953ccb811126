//! Call pacing and throttle handling.
//!
//! Every external call goes through `RateLimiter::call`:
//!
//! ```text
//! Pending → Sent → Accepted
//!                → Rejected
//!                → Throttled → (backoff) → Sent → ...
//! ```
//!
//! A throttled call is re-sent with the identical payload until the service
//! accepts or rejects it. There is no attempt cap; each retry is logged.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    /// Minimum spacing between the starts of consecutive calls.
    pub min_interval: Duration,
    /// Sleep after a throttle signal before re-sending.
    pub backoff: Duration,
    pub call_timeout: Option<Duration>,
}

impl RatePolicy {
    pub fn unthrottled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            backoff: Duration::ZERO,
            call_timeout: None,
        }
    }
}

/// How a single send ended, as reported by the caller's closure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The service asked us to slow down (HTTP 429 or equivalent).
    #[error("throttled")]
    Throttled { retry_after: Option<Duration> },
    /// Hard failure: not retried.
    #[error("{0}")]
    Rejected(String),
}

impl CallError {
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        CallError::Rejected(reason.to_string())
    }

    pub fn throttled() -> Self {
        CallError::Throttled { retry_after: None }
    }
}

/// Terminal failure returned by `RateLimiter::call`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Rejected(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Sent,
    Accepted,
    Throttled,
    Rejected,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Accepted | CallState::Rejected)
    }

    /// State reached once a sent call reports `outcome`.
    pub fn after<T>(outcome: &Result<T, CallError>) -> CallState {
        match outcome {
            Ok(_) => CallState::Accepted,
            Err(CallError::Throttled { .. }) => CallState::Throttled,
            Err(CallError::Rejected(_)) => CallState::Rejected,
        }
    }
}

pub struct RateLimiter {
    policy: RatePolicy,
    last_sent: Mutex<Option<Instant>>,
    sent: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            last_sent: Mutex::new(None),
            sent: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// Total sends, retries included.
    pub fn calls_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn throttle_count(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }

    /// Send a call, pacing it against the previous one and re-sending it for
    /// as long as the service throttles. `send` must rebuild the same request
    /// on every invocation.
    pub async fn call<T, F, Fut>(&self, label: &str, mut send: F) -> Result<T, Rejected>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut state = CallState::Pending;
        let mut attempt: u64 = 0;

        loop {
            self.wait_turn().await;
            attempt += 1;
            self.sent.fetch_add(1, Ordering::Relaxed);
            trace!(label, attempt, from = ?state, "Sending call");
            state = CallState::Sent;

            let outcome = match self.policy.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, send()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Rejected(format!(
                        "timed out after {:.1}s",
                        limit.as_secs_f64()
                    ))),
                },
                None => send().await,
            };

            trace!(label, attempt, from = ?state, to = ?CallState::after(&outcome), "Call finished");
            state = CallState::after(&outcome);

            match outcome {
                Ok(value) => return Ok(value),
                Err(CallError::Rejected(reason)) => {
                    debug!(label, attempt, reason = %reason, "Call rejected");
                    return Err(Rejected(reason));
                }
                Err(CallError::Throttled { retry_after }) => {
                    self.throttled.fetch_add(1, Ordering::Relaxed);
                    let pause = retry_after.map_or(self.policy.backoff, |r| r.max(self.policy.backoff));
                    warn!(
                        label,
                        attempt,
                        backoff_secs = pause.as_secs_f64(),
                        "Rate limited, re-sending the same call after backoff"
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    async fn wait_turn(&self) {
        let wait = {
            let last = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
            last.map(|t| (t + self.policy.min_interval).saturating_duration_since(Instant::now()))
        };
        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            tokio::time::sleep(wait).await;
        }
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}
