use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal pipeline errors. Anything here stops the run; per-item and per-batch
/// failures are recorded as data instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed corpus {path}: {reason}")]
    MalformedCorpus { path: PathBuf, reason: String },

    #[error("Failed to read corpus {path}: {source}")]
    CorpusIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint I/O error at {path}: {reason}")]
    CheckpointIo { path: PathBuf, reason: String },

    #[error("Checkpoint {path} does not match the corpus: {reason}")]
    CheckpointMismatch { path: PathBuf, reason: String },

    #[error("Output I/O error at {path}: {reason}")]
    OutputIo { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedCorpus {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A whole batch failed. Every item in the batch is recorded with this reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("batch failed: {reason}")]
pub struct BatchFailure {
    pub reason: String,
}

impl BatchFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch(expected: usize, got: usize) -> Self {
        Self::new(format!(
            "shape mismatch: expected {expected} results, got {got}"
        ))
    }
}
