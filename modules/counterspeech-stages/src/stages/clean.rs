//! Comment cleaning: one LLM call per batch classifies each comment's
//! language and strips emojis.

use std::sync::Arc;

use ai_client::{extract_json_array, strip_code_blocks, GenerationRequest, TextGenerator};
use async_trait::async_trait;
use counterspeech_engine::{
    Batch, BatchFailure, Grouped, ProcessingResult, Processor, Projection, RateLimiter,
    ResultRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::external::IntoCall;

pub const CLASSIFICATIONS: [&str; 3] = ["rom_hindi", "english", "other"];

/// Group for originals whose item failed.
pub const ERROR_GROUP: &str = "error";

const INSTRUCTION: &str = "You are an expert text processor. Your task is to process a JSON array of user comments.

For each comment, determine its `classification` and produce its `cleaned_text` version based on the following rules:

**Classification Categories:**
* `rom_hindi`: For comments in Romanized Hindi (Hinglish).
* `english`: For comments primarily in English.
* `other`: For all other languages, including Hindi in its native Devanagari script.

**Cleaning Rules:**
* **For ALL comments:** Remove emojis. Do not transliterate native scripts.

Your response must be a single, valid JSON array of objects. Each object must have two keys: \"classification\" and \"cleaned_text\". Maintain the original order and include no extra text or explanations.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedComment {
    pub classification: String,
    pub cleaned_text: String,
}

pub struct CommentCleaner {
    generator: Arc<dyn TextGenerator>,
}

impl CommentCleaner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn build_prompt(comments: &[&str]) -> Result<String, BatchFailure> {
        let encoded = serde_json::to_string(comments)
            .map_err(|e| BatchFailure::new(format!("could not encode batch: {e}")))?;
        Ok(format!("{INSTRUCTION}\n\nComments to process:\n{encoded}"))
    }
}

#[async_trait]
impl Processor for CommentCleaner {
    type Output = CleanedComment;

    fn name(&self) -> &str {
        "clean"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        let request = GenerationRequest::new(Self::build_prompt(&batch.texts())?).json();
        let generator = self.generator.as_ref();
        let request = &request;

        let reply = limiter
            .call("clean", move || async move { generator.generate(request).await.into_call() })
            .await
            .map_err(|rejected| BatchFailure::new(rejected.0))?;

        let results = parse_reply(&reply, batch.len())?;
        debug!(batch = batch.index, size = batch.len(), model = generator.model(), "Batch cleaned");
        Ok(results)
    }
}

/// The reply must be a JSON array with one object per comment, in order.
fn parse_reply(reply: &str, expected: usize) -> Result<Vec<ProcessingResult<CleanedComment>>, BatchFailure> {
    let body = strip_code_blocks(reply);
    let value: Value = serde_json::from_str(body)
        .or_else(|_| {
            let array = extract_json_array(body).unwrap_or(body);
            serde_json::from_str(array)
        })
        .map_err(|e| BatchFailure::new(format!("reply is not valid JSON: {e}")))?;

    let Value::Array(entries) = value else {
        return Err(BatchFailure::new("reply is not a JSON array"));
    };
    if entries.len() != expected {
        return Err(BatchFailure::shape_mismatch(expected, entries.len()));
    }

    Ok(entries
        .into_iter()
        .map(|entry| serde_json::from_value::<CleanedComment>(entry).into())
        .collect())
}

fn group_for(classification: &str) -> &'static str {
    let classification = classification.trim().to_lowercase();
    CLASSIFICATIONS
        .into_iter()
        .find(|c| *c == classification)
        .unwrap_or("other")
}

/// Cleaned texts grouped by classification, merged into whatever an earlier
/// run already wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanedGroups;

impl Projection<CleanedComment> for CleanedGroups {
    type Output = Grouped;

    fn project(&self, records: &[ResultRecord<CleanedComment>]) -> Grouped {
        records
            .iter()
            .filter_map(|r| match &r.result {
                Some(cleaned) => {
                    let text = cleaned.cleaned_text.trim();
                    (!text.is_empty()).then(|| (group_for(&cleaned.classification).to_string(), text.to_string()))
                }
                None => Some((ERROR_GROUP.to_string(), r.text.clone())),
            })
            .collect::<Grouped>()
            .with_groups(CLASSIFICATIONS)
    }

    fn cumulative(&self) -> bool {
        true
    }

    fn merge(&self, existing: Grouped, new: Grouped) -> Grouped {
        existing.merge_with_fallback(new, ERROR_GROUP)
    }
}
