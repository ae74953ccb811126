//! Checkpointed batch pipeline.
//!
//! Streams an ordered corpus of work items through an unreliable external call
//! in fixed-size batches: load → batch → process (rate limited) → checkpoint →
//! project. A crash loses at most the in-flight batch; restarting with the same
//! corpus resumes exactly where the last checkpoint left off.
//!
//! Consumers define a stage by implementing `Processor` (the external call)
//! and `Projection` (how the accumulated results become the final output).

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod normalize;
pub mod persist;
pub mod progress;
pub mod sink;
pub mod source;
pub mod traits;
pub mod types;

pub use batch::{batches, batches_from, Batch, Batches};
pub use config::{IdentityPolicy, PipelineConfig};
pub use engine::{Engine, RunSummary};
pub use error::{BatchFailure, PipelineError, Result};
pub use limiter::{CallError, CallState, RateLimiter, RatePolicy, Rejected};
pub use normalize::normalize_text;
pub use persist::{CheckpointStore, SkippedBatch, SkippedBatchLog};
pub use sink::{read_json, write_json_atomic, Grouped, OutputRecord, RecordList, ResultSink};
pub use source::{CorpusOptions, WorkSource};
pub use traits::{Processor, Projection};
pub use types::{ProcessingResult, ResultRecord, WorkItem};
