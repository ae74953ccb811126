//! Core traits for the pipeline engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::Batch;
use crate::error::BatchFailure;
use crate::limiter::RateLimiter;
use crate::types::{ProcessingResult, ResultRecord};

/// The external call of a stage.
///
/// `process` returns exactly one result per batch item, in batch order, or a
/// `BatchFailure` for the whole batch. Per-item failures are
/// `ProcessingResult::Failure`, never panics or early returns. Every network
/// or inference call must go through `limiter`.
#[async_trait]
pub trait Processor: Send + Sync {
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Short name used in logs and skipped-batch records.
    fn name(&self) -> &str;

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure>;
}

/// Turns the complete result list into the stage's final output document.
pub trait Projection<T>: Send + Sync {
    type Output: Serialize + DeserializeOwned;

    fn project(&self, records: &[ResultRecord<T>]) -> Self::Output;

    /// Whether the final output is merged into an existing file at the
    /// output path instead of replacing it.
    fn cumulative(&self) -> bool {
        false
    }

    /// Combine a previous output with a new one. Only called when
    /// `cumulative` is true.
    fn merge(&self, _existing: Self::Output, new: Self::Output) -> Self::Output {
        new
    }
}

// ---------------------------------------------------------------------------
// Arc<P> blanket so callers can keep a handle on a shared processor
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    type Output = P::Output;

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        (**self).process(batch, limiter).await
    }
}
