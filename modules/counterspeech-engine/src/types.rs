use serde::{Deserialize, Serialize};

/// One unit of work: the text handed to the external call plus its tags.
///
/// `key` is the identity key, derived once by the `WorkSource` either from the
/// normalized text or from the item's position (see `IdentityPolicy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: String,
    pub text: String,
    pub language: String,
    /// Originating video, when the corpus records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            language: language.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Outcome of processing a single item.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult<T> {
    Success(T),
    Failure(String),
}

impl<T> ProcessingResult<T> {
    pub fn failure(reason: impl Into<String>) -> Self {
        ProcessingResult::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingResult::Success(_))
    }
}

impl<T, E: std::fmt::Display> From<std::result::Result<T, E>> for ProcessingResult<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => ProcessingResult::Success(value),
            Err(e) => ProcessingResult::Failure(e.to_string()),
        }
    }
}

/// A checkpointed result: the item's identity and tags plus either a payload
/// or an error marker. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord<T> {
    pub key: String,
    pub text: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> ResultRecord<T> {
    pub fn new(item: &WorkItem, outcome: ProcessingResult<T>) -> Self {
        let (result, error) = match outcome {
            ProcessingResult::Success(value) => (Some(value), None),
            ProcessingResult::Failure(reason) => (None, Some(reason)),
        };
        Self {
            key: item.key.clone(),
            text: item.text.clone(),
            language: item.language.clone(),
            source: item.source.clone(),
            result,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}
