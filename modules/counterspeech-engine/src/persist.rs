//! Checkpoint and skipped-batch persistence.
//!
//! Every write goes to a sibling temp file which is fsynced and then renamed
//! over the target, so a reader never observes a torn file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::error::{PipelineError, Result};
use crate::types::ResultRecord;

// ---------------------------------------------------------------------------
// Atomic write helpers
// ---------------------------------------------------------------------------

/// Serialize `value` into a temp file next to `path`. The file is flushed and
/// synced but not yet visible at `path`.
pub(crate) fn stage_json<V: Serialize + ?Sized>(path: &Path, value: &V) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value).map_err(io::Error::other)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

pub(crate) fn replace_json<V: Serialize + ?Sized>(path: &Path, value: &V) -> io::Result<()> {
    let tmp = stage_json(path, value)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Snapshot of every result accumulated so far in a run.
///
/// The file is a JSON array of `ResultRecord`s in work order. It is rewritten
/// in full after every batch, never appended to.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the saved results and the resume offset. Returns `([], 0)` when
    /// no checkpoint exists. The offset is always `results.len()`.
    pub fn load<T: DeserializeOwned>(&self) -> Result<(Vec<ResultRecord<T>>, usize)> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(self.io_error(e)),
        };

        let results: Vec<ResultRecord<T>> =
            serde_json::from_str(&raw).map_err(|e| PipelineError::CheckpointIo {
                path: self.path.clone(),
                reason: format!("unreadable checkpoint: {e}"),
            })?;

        let offset = results.len();
        info!(path = %self.path.display(), offset, "Loaded checkpoint");
        Ok((results, offset))
    }

    /// Atomically replace the checkpoint with `results`.
    pub fn save<T: Serialize>(&self, results: &[ResultRecord<T>]) -> Result<()> {
        self.stage(results)?
            .persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        debug!(path = %self.path.display(), results = results.len(), "Checkpoint saved");
        Ok(())
    }

    /// Write `results` to a temp file beside the checkpoint without renaming
    /// it into place. Dropping the returned handle discards the write.
    pub(crate) fn stage<T: Serialize>(&self, results: &[ResultRecord<T>]) -> Result<NamedTempFile> {
        stage_json(&self.path, results).map_err(|e| self.io_error(e))
    }

    /// Remove the checkpoint. Call only after the final output is durable.
    pub fn finalize(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Checkpoint removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, e: io::Error) -> PipelineError {
        PipelineError::CheckpointIo {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SkippedBatchLog
// ---------------------------------------------------------------------------

/// One batch that failed as a whole, kept for a later reprocessing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedBatch {
    pub processor: String,
    pub batch_index: usize,
    pub offset: usize,
    pub keys: Vec<String>,
    pub texts: Vec<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl SkippedBatch {
    pub fn new(processor: &str, batch: &Batch<'_>, reason: impl Into<String>) -> Self {
        Self {
            processor: processor.to_string(),
            batch_index: batch.index,
            offset: batch.offset,
            keys: batch.iter().map(|item| item.key.clone()).collect(),
            texts: batch.iter().map(|item| item.text.clone()).collect(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    fn same_batch(&self, other: &SkippedBatch) -> bool {
        self.processor == other.processor && self.offset == other.offset && self.keys == other.keys
    }
}

/// JSON array of `SkippedBatch` entries, appended to across runs.
#[derive(Debug, Clone)]
pub struct SkippedBatchLog {
    path: PathBuf,
}

impl SkippedBatchLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<SkippedBatch>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&raw).map_err(|e| self.io_error(e))
    }

    /// Append `entry`, replacing an earlier entry for the same batch of the
    /// same processor (a resumed run redoing that batch).
    pub fn record(&self, entry: SkippedBatch) -> Result<()> {
        let mut entries = self.entries()?;
        entries.retain(|e| !e.same_batch(&entry));
        entries.push(entry);
        replace_json(&self.path, &entries).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::OutputIo {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingResult, WorkItem};

    fn record(text: &str) -> ResultRecord<String> {
        let item = WorkItem::new(text, text, "english");
        ResultRecord::new(&item, ProcessingResult::Success(text.to_uppercase()))
    }

    #[test]
    fn missing_checkpoint_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        let (results, offset) = store.load::<String>().unwrap();
        assert!(results.is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn save_then_load_gives_offset_equal_to_len() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.save(&[record("a"), record("b")]).unwrap();

        let (results, offset) = store.load::<String>().unwrap();
        assert_eq!(offset, 2);
        assert_eq!(results[1].result.as_deref(), Some("B"));
    }

    #[test]
    fn checkpoint_is_a_plain_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        CheckpointStore::new(&path).save(&[record("a")]).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["language"], "english");
        assert_eq!(value[0]["error"], serde_json::Value::Null);
    }

    #[test]
    fn staged_write_that_never_renames_leaves_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.save(&[record("a")]).unwrap();

        // Crash between temp write and rename.
        let staged = store.stage(&[record("a"), record("b"), record("c")]).unwrap();
        drop(staged);

        let (results, offset) = store.load::<String>().unwrap();
        assert_eq!(offset, 1);
        assert_eq!(results[0].text, "a");
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        fs::write(&path, "[{\"key\": ").unwrap();
        let err = CheckpointStore::new(&path).load::<String>().unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointIo { .. }));
    }

    #[test]
    fn finalize_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.save(&[record("a")]).unwrap();
        store.finalize().unwrap();
        assert!(!store.exists());
        store.finalize().unwrap();
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/deeper/cp.json"));
        store.save(&[record("a")]).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn skipped_batches_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let log = SkippedBatchLog::new(dir.path().join("skipped.json"));
        let items = vec![WorkItem::new("x", "x", "english")];
        let batch = Batch {
            index: 3,
            offset: 6,
            items: &items,
        };

        let later = Batch {
            index: 4,
            offset: 7,
            items: &items,
        };

        log.record(SkippedBatch::new("cleaner", &batch, "HTTP 500")).unwrap();
        log.record(SkippedBatch::new("cleaner", &later, "HTTP 502")).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].batch_index, 3);
        assert_eq!(entries[0].keys, vec!["x"]);
        assert_eq!(entries[1].reason, "HTTP 502");
    }

    #[test]
    fn redone_batch_replaces_its_skipped_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = SkippedBatchLog::new(dir.path().join("skipped.json"));
        let items = vec![WorkItem::new("x", "x", "english"), WorkItem::new("y", "y", "english")];
        let batch = Batch {
            index: 1,
            offset: 2,
            items: &items,
        };

        log.record(SkippedBatch::new("cleaner", &batch, "HTTP 500")).unwrap();
        log.record(SkippedBatch::new("cleaner", &batch, "HTTP 503")).unwrap();
        log.record(SkippedBatch::new("scorer", &batch, "HTTP 500")).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].processor, "cleaner");
        assert_eq!(entries[0].reason, "HTTP 503");
        assert_eq!(entries[1].processor, "scorer");
    }
}
