//! Toxicity scoring of generated replies with Perspective.

use std::sync::LazyLock;

use async_trait::async_trait;
use counterspeech_engine::{Batch, BatchFailure, ProcessingResult, Processor, RateLimiter};
use perspective_client::{PerspectiveClient, Scores, DEFAULT_ATTRIBUTES};
use regex::Regex;

use crate::external::IntoCall;

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").expect("valid control-char regex"));

/// Drop ASCII control characters (newlines included); Perspective rejects
/// some of them.
pub fn strip_control_chars(text: &str) -> String {
    CONTROL_CHARS.replace_all(text, "").into_owned()
}

pub struct ToxicityScorer {
    client: PerspectiveClient,
    attributes: Vec<String>,
    languages: Vec<String>,
}

impl ToxicityScorer {
    pub fn new(client: PerspectiveClient) -> Self {
        Self {
            client,
            attributes: DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            languages: vec!["en".to_string()],
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    async fn score(&self, text: &str, limiter: &RateLimiter) -> ProcessingResult<Scores> {
        let text = strip_control_chars(text);
        if text.trim().is_empty() {
            return ProcessingResult::failure("nothing left to score after stripping control characters");
        }

        let attributes: Vec<&str> = self.attributes.iter().map(String::as_str).collect();
        let languages: Vec<&str> = self.languages.iter().map(String::as_str).collect();
        let (client, text, attributes, languages) = (&self.client, text.as_str(), &attributes, &languages);

        limiter
            .call("perspective", move || async move {
                client.analyze(text, attributes, languages).await.into_call()
            })
            .await
            .into()
    }
}

#[async_trait]
impl Processor for ToxicityScorer {
    type Output = Scores;

    fn name(&self) -> &str {
        "score"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        let mut results = Vec::with_capacity(batch.len());
        for item in batch.iter() {
            results.push(self.score(&item.text, limiter).await);
        }
        Ok(results)
    }
}
