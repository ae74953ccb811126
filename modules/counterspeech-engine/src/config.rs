use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::limiter::RatePolicy;

/// Runtime knobs for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Minimum spacing between external calls, applied even on success.
    pub inter_call_delay_seconds: f64,
    /// Sleep before re-sending a throttled call.
    pub rate_limit_backoff_seconds: f64,
    /// Per-call timeout. A timed-out call is a hard error for its item/batch.
    pub call_timeout_seconds: Option<f64>,
    pub checkpoint_path: PathBuf,
    pub final_output_path: PathBuf,
    /// Where whole-batch failures are logged for later reprocessing.
    pub skipped_batches_path: Option<PathBuf>,
    /// Only process a prefix of the corpus (smoke tests).
    pub max_items: Option<usize>,
}

impl PipelineConfig {
    pub fn new(checkpoint_path: impl Into<PathBuf>, final_output_path: impl Into<PathBuf>) -> Self {
        Self {
            batch_size: 16,
            inter_call_delay_seconds: 1.0,
            rate_limit_backoff_seconds: 3.0,
            call_timeout_seconds: Some(120.0),
            checkpoint_path: checkpoint_path.into(),
            final_output_path: final_output_path.into(),
            skipped_batches_path: None,
            max_items: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        for (name, value) in [
            ("inter_call_delay_seconds", Some(self.inter_call_delay_seconds)),
            ("rate_limit_backoff_seconds", Some(self.rate_limit_backoff_seconds)),
            ("call_timeout_seconds", self.call_timeout_seconds),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(PipelineError::Config(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        if self.checkpoint_path == self.final_output_path {
            return Err(PipelineError::Config(
                "checkpoint_path and final_output_path must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn rate_policy(&self) -> RatePolicy {
        RatePolicy {
            min_interval: Duration::from_secs_f64(self.inter_call_delay_seconds),
            backoff: Duration::from_secs_f64(self.rate_limit_backoff_seconds),
            call_timeout: self.call_timeout_seconds.map(Duration::from_secs_f64),
        }
    }
}

/// How a work item's identity key is derived. Fixed for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// Key is the normalized text.
    #[default]
    Text,
    /// Key is the item's index in the (deduplicated) sequence.
    Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = PipelineConfig::new("cp.json", "out.json");
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_delay() {
        let mut config = PipelineConfig::new("cp.json", "out.json");
        config.inter_call_delay_seconds = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shared_checkpoint_and_output() {
        let config = PipelineConfig::new("same.json", "same.json");
        assert!(config.validate().is_err());
    }

    #[test]
    fn rate_policy_converts_seconds() {
        let mut config = PipelineConfig::new("cp.json", "out.json");
        config.inter_call_delay_seconds = 0.2;
        config.rate_limit_backoff_seconds = 3.0;
        config.call_timeout_seconds = None;
        let policy = config.rate_policy();
        assert_eq!(policy.min_interval, Duration::from_millis(200));
        assert_eq!(policy.backoff, Duration::from_secs(3));
        assert!(policy.call_timeout.is_none());
    }
}
