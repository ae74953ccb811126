//! Final output writing.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::normalize::normalize_text;
use crate::persist::replace_json;
use crate::traits::Projection;
use crate::types::ResultRecord;

/// Atomically write `value` as pretty JSON to `path`.
pub fn write_json_atomic<V: Serialize + ?Sized>(path: &Path, value: &V) -> Result<()> {
    replace_json(path, value).map_err(|e| PipelineError::OutputIo {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read a JSON document, `None` when the file does not exist.
pub fn read_json<V: DeserializeOwned>(path: &Path) -> Result<Option<V>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PipelineError::OutputIo {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| PipelineError::OutputIo {
            path: path.to_path_buf(),
            reason: format!("existing output is not valid: {e}"),
        })
}

// ---------------------------------------------------------------------------
// Grouped
// ---------------------------------------------------------------------------

/// Texts grouped by category, e.g. `{"english": [...], "rom_hindi": [...]}`.
///
/// A text (compared by normalized form) appears at most once across all
/// groups; the first placement wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grouped(BTreeMap<String, Vec<String>>);

impl Grouped {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &str) -> Option<&[String]> {
        self.0.get(group).map(Vec::as_slice)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total number of texts across every group.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    /// Union of `self` and `newer`: everything already here keeps its place,
    /// texts from `newer` not seen anywhere in `self` are appended.
    pub fn merge(self, newer: Grouped) -> Grouped {
        let names: Vec<String> = self.0.keys().chain(newer.0.keys()).cloned().collect();
        let existing = self.0.into_iter().flat_map(|(g, texts)| texts.into_iter().map(move |t| (g.clone(), t)));
        let incoming = newer.0.into_iter().flat_map(|(g, texts)| texts.into_iter().map(move |t| (g.clone(), t)));
        existing.chain(incoming).collect::<Grouped>().with_groups(names)
    }

    /// Like [`merge`](Self::merge), but texts in `fallback` rank below every
    /// other group: a fallback entry from either side is dropped once the
    /// same text has a place in a real group.
    pub fn merge_with_fallback(self, newer: Grouped, fallback: &str) -> Grouped {
        let names: Vec<String> = self.0.keys().chain(newer.0.keys()).cloned().collect();
        let (old_fallback, old_rest) = self.split_off(fallback);
        let (new_fallback, new_rest) = newer.split_off(fallback);

        let placed = |grouped: Grouped| {
            grouped
                .0
                .into_iter()
                .flat_map(|(g, texts)| texts.into_iter().map(move |t| (g.clone(), t)))
        };
        let demoted = move |texts: Vec<String>| texts.into_iter().map(move |t| (fallback.to_string(), t));

        placed(old_rest)
            .chain(placed(new_rest))
            .chain(demoted(old_fallback))
            .chain(demoted(new_fallback))
            .collect::<Grouped>()
            .with_groups(names)
    }

    fn split_off(mut self, group: &str) -> (Vec<String>, Grouped) {
        let texts = self.0.remove(group).unwrap_or_default();
        (texts, self)
    }

    /// Make sure each named group is present, empty if nothing landed there.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            self.0.entry(group.into()).or_default();
        }
        self
    }
}

impl FromIterator<(String, String)> for Grouped {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (group, text) in iter {
            if seen.insert(normalize_text(&text)) {
                groups.entry(group).or_default().push(text);
            }
        }
        Grouped(groups)
    }
}

// ---------------------------------------------------------------------------
// Flat record output
// ---------------------------------------------------------------------------

/// Per-item output row: `{"comment", "language", "output"}` plus the error
/// marker when the item failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord<T> {
    pub comment: String,
    pub language: String,
    pub output: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Clone> From<&ResultRecord<T>> for OutputRecord<T> {
    fn from(record: &ResultRecord<T>) -> Self {
        Self {
            comment: record.text.clone(),
            language: record.language.clone(),
            output: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

/// Projects results to a flat `Vec<OutputRecord>` in work order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordList;

impl<T> Projection<T> for RecordList
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    type Output = Vec<OutputRecord<T>>;

    fn project(&self, records: &[ResultRecord<T>]) -> Self::Output {
        records.iter().map(OutputRecord::from).collect()
    }
}

// ---------------------------------------------------------------------------
// ResultSink
// ---------------------------------------------------------------------------

/// Writes the projected final output, merging into an existing file when the
/// projection is cumulative.
#[derive(Debug, Clone)]
pub struct ResultSink {
    path: PathBuf,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write<T, P: Projection<T>>(&self, projection: &P, records: &[ResultRecord<T>]) -> Result<()> {
        let mut output = projection.project(records);

        if projection.cumulative() {
            if let Some(existing) = read_json::<P::Output>(&self.path)? {
                info!(path = %self.path.display(), "Merging into existing output");
                output = projection.merge(existing, output);
            }
        }

        write_json_atomic(&self.path, &output)?;
        info!(path = %self.path.display(), records = records.len(), "Final output written");
        Ok(())
    }
}
