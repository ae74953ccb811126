//! Counterspeech generation against relevant comments.

use std::sync::Arc;

use ai_client::{extract_json_object, GenerationRequest, TextGenerator};
use async_trait::async_trait;
use counterspeech_engine::{Batch, BatchFailure, ProcessingResult, Processor, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::external::IntoCall;

const INSTRUCTION: &str = "You are a respectful counterspeech assistant.

Generate a polite, educational counterspeech message in English
for the following YouTube comment:";

/// How replies are requested from the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// One chat call per comment.
    #[default]
    Item,
    /// One completion call carrying every prompt in the batch.
    Batch,
}

pub struct CounterspeechGenerator {
    generator: Arc<dyn TextGenerator>,
    mode: GenerationMode,
    template: GenerationRequest,
}

impl CounterspeechGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, mode: GenerationMode) -> Self {
        Self {
            generator,
            mode,
            template: GenerationRequest::new(String::new()).temperature(0.7),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.template.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.template.max_tokens = Some(max_tokens);
        self
    }

    /// Completion-style prompt; the model continues after `[RESPONSE]:`.
    pub fn completion_prompt(comment: &str) -> String {
        format!("{INSTRUCTION}\n\n[COMMENT]: {comment}\n[RESPONSE]:")
    }

    /// Chat prompt asking for a JSON object with a `counterspeech` field.
    pub fn chat_prompt(comment: &str) -> String {
        format!(
            "{INSTRUCTION}\n\n\"{comment}\"\n\nOutput format (strict JSON):\n{{\"counterspeech\": \"your response here\"}}"
        )
    }

    async fn batch_mode(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<String>>, BatchFailure> {
        let prompts: Vec<String> = batch.iter().map(|item| Self::completion_prompt(&item.text)).collect();
        let generator = self.generator.as_ref();
        let (prompts, template) = (&prompts, &self.template);

        let replies = limiter
            .call("generate.batch", move || async move {
                generator.generate_batch(prompts, template).await.into_call()
            })
            .await
            .map_err(|rejected| BatchFailure::new(rejected.0))?;

        if replies.len() != batch.len() {
            return Err(BatchFailure::shape_mismatch(batch.len(), replies.len()));
        }
        Ok(replies.iter().map(|reply| clean_reply(reply)).collect())
    }

    async fn item_mode(&self, batch: &Batch<'_>, limiter: &RateLimiter) -> Vec<ProcessingResult<String>> {
        let generator = self.generator.as_ref();
        let mut results = Vec::with_capacity(batch.len());

        for item in batch.iter() {
            let request = GenerationRequest {
                prompt: Self::chat_prompt(&item.text),
                ..self.template.clone()
            };
            let request = &request;
            let outcome = match limiter
                .call("generate.item", move || async move { generator.generate(request).await.into_call() })
                .await
            {
                Ok(reply) => clean_reply(&reply),
                Err(rejected) => ProcessingResult::failure(rejected.0),
            };
            results.push(outcome);
        }
        results
    }
}

#[async_trait]
impl Processor for CounterspeechGenerator {
    type Output = String;

    fn name(&self) -> &str {
        "generate"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        debug!(batch = batch.index, mode = ?self.mode, model = self.generator.model(), "Generating");
        match self.mode {
            GenerationMode::Batch => self.batch_mode(batch, limiter).await,
            GenerationMode::Item => Ok(self.item_mode(batch, limiter).await),
        }
    }
}

/// Pull the reply text out of whatever the model echoed around it.
pub fn clean_reply(raw: &str) -> ProcessingResult<String> {
    if let Some(text) = extract_json_object(raw)
        .and_then(|o| serde_json::from_str::<serde_json::Value>(o).ok())
        .and_then(|v| v.get("counterspeech")?.as_str().map(str::to_string))
    {
        return finish(&text);
    }

    let mut text = raw;
    for marker in ["[RESPONSE]:", "[/INST]"] {
        if let Some((_, after)) = text.split_once(marker) {
            text = after;
        }
    }
    for marker in ["User:", "[COMMENT]:"] {
        if let Some((before, _)) = text.split_once(marker) {
            text = before;
        }
    }
    finish(text)
}

fn finish(text: &str) -> ProcessingResult<String> {
    let text = text.trim();
    if text.is_empty() {
        ProcessingResult::failure("empty reply")
    } else {
        ProcessingResult::Success(text.to_string())
    }
}
