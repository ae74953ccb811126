//! Relevance filtering: keeps comments that generalize about India, its
//! people or its culture.

use std::collections::BTreeMap;
use std::sync::Arc;

use ai_client::{extract_json_object, strip_code_blocks, truncate_to_char_boundary, GenerationRequest, TextGenerator};
use async_trait::async_trait;
use counterspeech_engine::{
    Batch, BatchFailure, Grouped, ProcessingResult, Processor, Projection, RateLimiter,
    ResultRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::external::IntoCall;

const INSTRUCTION: &str = r#"You are analyzing YouTube comments on travel vlogs related to India for a project on societal biases.
Your task is to classify each comment as "relevant" or "irrelevant" based on a strict definition.

Definition of Relevance:
A comment is relevant *only if* it expresses a clear opinion, generalization, or comparison about:
* Broad Societal Topics: Indian culture, society, safety, politics, religion, traditions, or lifestyle (e.g., "India is so unsafe for women," "Indian culture is very spiritual").
* Explicit Judgments: Direct praise, criticism, or controversy about India, its people, or its culture as a whole (e.g., "Indians are the friendliest people," "India is a very dirty country").
* Direct Comparisons: Explicit comparisons between India and other countries (e.g., "It's cleaner here than in Pakistan," "People in Europe are not as welcoming as in India").
* Generalizations from Travel: Travel experiences that are used to make a broader conclusion about the country or its people (e.g., "I got scammed, this happens all the time in India").

Definition of Irrelevance:
A comment is irrelevant if it:
* Is a Personal Anecdote: Describes a simple, personal interaction or a specific event *without* making a broader judgment (e.g., "The lady on the street gave me an apple," "Our guide was very nice").
* Is a Simple Observation: Makes a neutral observation about food, prices, or scenery (e.g., "That food looks delicious," "The mountains are beautiful," "The train was late").
* Focuses on the Creator: Talks about the vlogger, their music, editing, or unrelated topics (e.g., "Love your videos!", "What camera do you use?").
* Is Generic: Contains only emojis, tags, links, timestamps, spam, promotions, or random text.

Output format:
Return results as JSON with two fields:

{
  "comment": "<original comment>",
  "classification": "relevant" or "irrelevant"
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

impl Relevance {
    pub fn as_str(self) -> &'static str {
        match self {
            Relevance::Relevant => "relevant",
            Relevance::Irrelevant => "irrelevant",
        }
    }
}

pub struct RelevanceFilter {
    generator: Arc<dyn TextGenerator>,
}

impl RelevanceFilter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn build_prompt(comment: &str) -> String {
        format!("{INSTRUCTION}\n\n---\nPlease classify the following comment:\n\"{comment}\"")
    }

    async fn classify(&self, comment: &str, limiter: &RateLimiter) -> ProcessingResult<Relevance> {
        let request = GenerationRequest::new(Self::build_prompt(comment)).json();
        let generator = self.generator.as_ref();
        let request = &request;

        let reply = match limiter
            .call("filter", move || async move { generator.generate(request).await.into_call() })
            .await
        {
            Ok(reply) => reply,
            Err(rejected) => return ProcessingResult::failure(rejected.0),
        };

        let outcome = parse_label(&reply);
        debug!(comment = truncate_to_char_boundary(comment, 60), ok = outcome.is_success(), "Classified");
        outcome
    }
}

#[async_trait]
impl Processor for RelevanceFilter {
    type Output = Relevance;

    fn name(&self) -> &str {
        "filter"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        let mut results = Vec::with_capacity(batch.len());
        for item in batch.iter() {
            results.push(self.classify(&item.text, limiter).await);
        }
        Ok(results)
    }
}

/// Accepts `{"classification": ..}`, a list whose first element is such an
/// object, or a bare label.
fn parse_label(reply: &str) -> ProcessingResult<Relevance> {
    let body = strip_code_blocks(reply);
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| extract_json_object(body).and_then(|o| serde_json::from_str(o).ok()));

    let label = match parsed {
        Some(Value::Array(entries)) => match entries.into_iter().next() {
            Some(first) => classification_of(&first),
            None => return ProcessingResult::failure("empty list in reply"),
        },
        Some(value @ Value::Object(_)) => classification_of(&value),
        Some(Value::String(s)) => Some(s),
        _ => Some(body.to_string()),
    };

    let Some(label) = label else {
        return ProcessingResult::failure("reply has no classification");
    };
    match label.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase().as_str() {
        "relevant" => ProcessingResult::Success(Relevance::Relevant),
        "irrelevant" => ProcessingResult::Success(Relevance::Irrelevant),
        other => ProcessingResult::failure(format!(
            "unexpected classification {:?}",
            truncate_to_char_boundary(other, 40)
        )),
    }
}

fn classification_of(value: &Value) -> Option<String> {
    value.get("classification")?.as_str().map(str::to_string)
}

/// `{relevant: {lang: [..]}, irrelevant: {..}, error: {..}}`.
pub type FilterOutput = BTreeMap<String, Grouped>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceSplit;

impl Projection<Relevance> for RelevanceSplit {
    type Output = FilterOutput;

    fn project(&self, records: &[ResultRecord<Relevance>]) -> FilterOutput {
        let mut sections: BTreeMap<&'static str, Vec<(String, String)>> = BTreeMap::new();
        sections.insert(Relevance::Relevant.as_str(), Vec::new());
        sections.insert(Relevance::Irrelevant.as_str(), Vec::new());

        for record in records {
            let section = record.result.map_or("error", Relevance::as_str);
            sections
                .entry(section)
                .or_default()
                .push((record.language.clone(), record.text.clone()));
        }

        sections
            .into_iter()
            .map(|(section, pairs)| (section.to_string(), pairs.into_iter().collect()))
            .collect()
    }
}
