//! Corpus loading.
//!
//! Accepted shapes:
//! - `["text", ...]`: one implicit language (`default_language`)
//! - `{"<lang>": ["text", ...], ...}`: groups concatenated in the configured
//!   `languages` order, otherwise in lexicographic key order
//! - `[{...}, ...]`: records; `text_field` holds a string or an array of
//!   strings (one item per element), `language_field` and `source_field` tag it
//! - `*.txt`: one entry per non-blank line
//!
//! The produced order is a pure function of the file contents, so resume
//! offsets stay valid across restarts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::IdentityPolicy;
use crate::error::{PipelineError, Result};
use crate::normalize::normalize_text;
use crate::types::WorkItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusOptions {
    /// Collapse items whose normalized text was already seen.
    pub dedup: bool,
    pub identity: IdentityPolicy,
    /// Flatten order for language-keyed corpora. Every listed key must exist;
    /// unlisted keys are ignored.
    pub languages: Option<Vec<String>>,
    pub default_language: String,
    /// Top-level object key to descend into before shape detection.
    pub section: Option<String>,
    pub text_field: String,
    pub language_field: String,
    pub source_field: String,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        Self {
            dedup: true,
            identity: IdentityPolicy::Text,
            languages: None,
            default_language: "unknown".to_string(),
            section: None,
            text_field: "comment".to_string(),
            language_field: "language".to_string(),
            source_field: "video_id".to_string(),
        }
    }
}

/// Raw entry before filtering, dedup and key assignment.
struct Entry {
    text: String,
    language: String,
    source: Option<String>,
}

pub struct WorkSource {
    path: PathBuf,
    options: CorpusOptions,
}

impl WorkSource {
    pub fn new(path: impl Into<PathBuf>, options: CorpusOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the corpus file and produce the ordered work sequence.
    pub fn load(&self) -> Result<Vec<WorkItem>> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| {
            PipelineError::CorpusIo {
                path: self.path.clone(),
                source,
            }
        })?;

        let entries = if self.path.extension().is_some_and(|ext| ext == "txt") {
            self.entries_from_lines(&content)
        } else {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| PipelineError::malformed(&self.path, format!("invalid JSON: {e}")))?;
            self.entries_from_value(value)?
        };

        let items = self.finish(entries);
        info!(
            path = %self.path.display(),
            items = items.len(),
            dedup = self.options.dedup,
            "Loaded corpus"
        );
        Ok(items)
    }

    /// Build the work sequence from an already-parsed JSON document.
    pub fn from_value(&self, value: Value) -> Result<Vec<WorkItem>> {
        let entries = self.entries_from_value(value)?;
        Ok(self.finish(entries))
    }

    fn entries_from_lines(&self, content: &str) -> Vec<Entry> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Entry {
                text: line.to_string(),
                language: self.options.default_language.clone(),
                source: None,
            })
            .collect()
    }

    fn entries_from_value(&self, value: Value) -> Result<Vec<Entry>> {
        let value = match &self.options.section {
            Some(section) => match value {
                Value::Object(mut map) => map.remove(section).ok_or_else(|| {
                    self.malformed(format!("section \"{section}\" is missing"))
                })?,
                _ => {
                    return Err(self.malformed(format!(
                        "section \"{section}\" requested but the corpus is not an object"
                    )))
                }
            },
            None => value,
        };

        match value {
            Value::Array(values) => self.entries_from_array(values),
            Value::Object(map) => self.entries_from_groups(map),
            other => Err(self.malformed(format!(
                "expected an array or an object, found {}",
                kind(&other)
            ))),
        }
    }

    fn entries_from_array(&self, values: Vec<Value>) -> Result<Vec<Entry>> {
        match values.first() {
            None => Ok(Vec::new()),
            Some(Value::String(_)) => {
                let texts = self.strings(values, "corpus")?;
                Ok(texts
                    .into_iter()
                    .map(|text| Entry {
                        text,
                        language: self.options.default_language.clone(),
                        source: None,
                    })
                    .collect())
            }
            Some(Value::Object(_)) => self.entries_from_records(values),
            Some(other) => Err(self.malformed(format!(
                "array elements must be strings or objects, found {}",
                kind(other)
            ))),
        }
    }

    fn entries_from_groups(&self, map: serde_json::Map<String, Value>) -> Result<Vec<Entry>> {
        let order: Vec<String> = match &self.options.languages {
            Some(languages) => {
                for language in languages {
                    if !map.contains_key(language) {
                        return Err(self.malformed(format!("language key \"{language}\" is missing")));
                    }
                }
                languages.clone()
            }
            None => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
        };

        let mut map = map;
        let mut entries = Vec::new();
        for language in order {
            let Some(value) = map.remove(&language) else {
                continue;
            };
            let values = match value {
                Value::Array(values) => values,
                other => {
                    return Err(self.malformed(format!(
                        "language key \"{language}\" must hold an array, found {}",
                        kind(&other)
                    )))
                }
            };
            let texts = self.strings(values, &language)?;
            debug!(language = %language, count = texts.len(), "Flattened language group");
            entries.extend(texts.into_iter().map(|text| Entry {
                text,
                language: language.clone(),
                source: None,
            }));
        }
        Ok(entries)
    }

    fn entries_from_records(&self, values: Vec<Value>) -> Result<Vec<Entry>> {
        let text_field = &self.options.text_field;
        let mut entries = Vec::new();

        for (index, record) in values.into_iter().enumerate() {
            let Value::Object(mut record) = record else {
                return Err(self.malformed(format!("record #{index} is not an object")));
            };

            let language = record
                .get(&self.options.language_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.options.default_language.clone());
            let source = record
                .get(&self.options.source_field)
                .and_then(Value::as_str)
                .map(str::to_string);

            match record.remove(text_field) {
                Some(Value::String(text)) => entries.push(Entry {
                    text,
                    language,
                    source,
                }),
                Some(Value::Array(values)) => {
                    let texts = self.strings(values, &format!("record #{index}.{text_field}"))?;
                    entries.extend(texts.into_iter().map(|text| Entry {
                        text,
                        language: language.clone(),
                        source: source.clone(),
                    }));
                }
                Some(Value::Null) => {
                    debug!(index, field = %text_field, "Record has no text (upstream failure), skipping");
                }
                Some(other) => {
                    return Err(self.malformed(format!(
                        "record #{index} field \"{text_field}\" must be a string or an array, found {}",
                        kind(&other)
                    )))
                }
                None => {
                    return Err(self.malformed(format!(
                        "record #{index} is missing field \"{text_field}\""
                    )))
                }
            }
        }
        Ok(entries)
    }

    fn strings(&self, values: Vec<Value>, context: &str) -> Result<Vec<String>> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::String(s) => Ok(s),
                other => Err(self.malformed(format!(
                    "{context}[{i}] must be a string, found {}",
                    kind(&other)
                ))),
            })
            .collect()
    }

    /// Drop blank texts, collapse duplicates, assign identity keys.
    fn finish(&self, entries: Vec<Entry>) -> Vec<WorkItem> {
        let mut seen = HashSet::new();
        let mut dropped_blank = 0usize;
        let mut dropped_duplicate = 0usize;
        let mut items = Vec::with_capacity(entries.len());

        for entry in entries {
            let normalized = normalize_text(&entry.text);
            if normalized.is_empty() {
                dropped_blank += 1;
                continue;
            }
            if self.options.dedup && !seen.insert(normalized.clone()) {
                dropped_duplicate += 1;
                continue;
            }

            let key = match self.options.identity {
                IdentityPolicy::Text => normalized,
                IdentityPolicy::Position => items.len().to_string(),
            };
            let mut item = WorkItem::new(key, entry.text.trim(), entry.language);
            item.source = entry.source;
            items.push(item);
        }

        if dropped_blank > 0 || dropped_duplicate > 0 {
            debug!(dropped_blank, dropped_duplicate, "Filtered corpus entries");
        }
        items
    }

    fn malformed(&self, reason: String) -> PipelineError {
        PipelineError::malformed(&self.path, reason)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
