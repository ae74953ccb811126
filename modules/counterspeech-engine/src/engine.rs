//! The batch loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};

use crate::batch::{batches_from, Batch};
use crate::config::PipelineConfig;
use crate::error::{BatchFailure, PipelineError, Result};
use crate::limiter::RateLimiter;
use crate::persist::{CheckpointStore, SkippedBatch, SkippedBatchLog};
use crate::progress::{format_duration, Progress};
use crate::sink::ResultSink;
use crate::source::WorkSource;
use crate::traits::{Processor, Projection};
use crate::types::{ProcessingResult, ResultRecord, WorkItem};

/// Checkpointed batch pipeline over one processor.
///
/// load → resume → (process batch → checkpoint)* → project → write → delete
/// checkpoint. Batches run strictly one after another; every external call
/// inside a batch shares the same `RateLimiter`.
pub struct Engine<P, J> {
    processor: P,
    projection: J,
    config: PipelineConfig,
    limiter: RateLimiter,
    run_id: String,
}

impl<P, J> Engine<P, J>
where
    P: Processor,
    J: Projection<P::Output>,
{
    pub fn new(processor: P, projection: J, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let limiter = RateLimiter::new(config.rate_policy());
        Ok(Self {
            processor,
            projection,
            config,
            limiter,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Load the corpus and run it to completion.
    pub async fn run(&self, source: &WorkSource) -> Result<RunSummary> {
        let items = source.load()?;
        self.run_items(items).await
    }

    /// Run an already loaded work sequence to completion.
    pub async fn run_items(&self, items: Vec<WorkItem>) -> Result<RunSummary> {
        let span = info_span!("pipeline", run_id = %self.run_id, processor = self.processor.name());
        self.drive(items).instrument(span).await
    }

    async fn drive(&self, mut items: Vec<WorkItem>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();
        let name = self.processor.name().to_string();

        if let Some(max) = self.config.max_items {
            if items.len() > max {
                info!(max, available = items.len(), "Limiting run to a corpus prefix");
                items.truncate(max);
            }
        }
        let total = items.len();

        let store = CheckpointStore::new(&self.config.checkpoint_path);
        let (mut results, resumed_from) = store.load::<P::Output>()?;
        verify_prefix(&store, &items, &results)?;
        if resumed_from > 0 {
            info!(resumed_from, total, "Resuming from checkpoint");
        }

        let skipped_log = self.config.skipped_batches_path.as_ref().map(SkippedBatchLog::new);
        let mut progress = Progress::new(total, resumed_from);
        let mut batch_count = 0;
        let mut skipped_batches = 0;

        info!(total, batch_size = self.config.batch_size, "Starting pipeline");

        for batch in batches_from(&items, resumed_from, self.config.batch_size) {
            let before = results.len();
            let mut skipped = None;

            match self.process_batch(&batch).await {
                Ok(per_item) => {
                    results.extend(
                        batch
                            .iter()
                            .zip(per_item)
                            .map(|(item, outcome)| ResultRecord::new(item, outcome)),
                    );
                }
                Err(failure) => {
                    warn!(
                        batch = batch.index,
                        offset = batch.offset,
                        size = batch.len(),
                        reason = %failure.reason,
                        "Batch failed, recording every item as an error"
                    );
                    skipped_batches += 1;
                    skipped = Some(SkippedBatch::new(&name, &batch, failure.reason.clone()));
                    results.extend(batch.iter().map(|item| {
                        ResultRecord::new(item, ProcessingResult::failure(failure.reason.clone()))
                    }));
                }
            }
            debug_assert_eq!(results.len(), before + batch.len());

            store.save(&results)?;
            if let (Some(log), Some(entry)) = (&skipped_log, skipped) {
                log.record(entry)?;
            }
            batch_count += 1;
            progress.advance(batch.len());
            progress.log(&name, batch.index);
        }

        ResultSink::new(&self.config.final_output_path).write(&self.projection, &results)?;
        store.finalize()?;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            processor: name,
            total,
            succeeded,
            failed: results.len() - succeeded,
            resumed_from,
            batches: batch_count,
            skipped_batches,
            calls_sent: self.limiter.calls_sent(),
            throttled: self.limiter.throttle_count(),
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Pipeline complete"
        );
        Ok(summary)
    }

    /// Run the processor on one batch and hold it to the one-result-per-item
    /// contract.
    async fn process_batch(&self, batch: &Batch<'_>) -> std::result::Result<Vec<ProcessingResult<P::Output>>, BatchFailure> {
        let per_item = self.processor.process(batch, &self.limiter).await?;
        if per_item.len() != batch.len() {
            return Err(BatchFailure::shape_mismatch(batch.len(), per_item.len()));
        }
        Ok(per_item)
    }
}

/// The checkpoint must be a prefix of the current work sequence, key for key.
fn verify_prefix<T>(store: &CheckpointStore, items: &[WorkItem], results: &[ResultRecord<T>]) -> Result<()> {
    let mismatch = |reason: String| PipelineError::CheckpointMismatch {
        path: store.path().to_path_buf(),
        reason,
    };

    if results.len() > items.len() {
        return Err(mismatch(format!(
            "checkpoint holds {} results but the corpus has only {} items",
            results.len(),
            items.len()
        )));
    }

    if let Some((position, (record, item))) = results
        .iter()
        .zip(items)
        .enumerate()
        .find(|(_, (record, item))| record.key != item.key)
    {
        return Err(mismatch(format!(
            "result {position} is for {:?} but the corpus has {:?} there",
            record.key, item.key
        )));
    }
    Ok(())
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub processor: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Results restored from a checkpoint at startup.
    pub resumed_from: usize,
    /// Batches processed by this process.
    pub batches: usize,
    pub skipped_batches: usize,
    pub calls_sent: u64,
    pub throttled: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== {} Run Complete ===", self.processor)?;
        writeln!(f, "Run id:          {}", self.run_id)?;
        writeln!(f, "Started:         {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Elapsed:         {}", format_duration(self.elapsed))?;
        writeln!(f, "Items:           {}", self.total)?;
        writeln!(f, "Succeeded:       {}", self.succeeded)?;
        writeln!(f, "Failed:          {}", self.failed)?;
        writeln!(f, "Resumed from:    {}", self.resumed_from)?;
        writeln!(f, "Batches:         {} ({} failed)", self.batches, self.skipped_batches)?;
        writeln!(f, "Calls sent:      {} ({} throttled)", self.calls_sent, self.throttled)?;
        Ok(())
    }
}
