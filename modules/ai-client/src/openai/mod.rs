mod client;
pub(crate) mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::{GenerationRequest, TextGenerator};
use client::{OpenAiClient, OPENAI_API_URL};
use types::{ChatRequest, CompletionRequest, ResponseFormat, WireMessage};

// =============================================================================
// OpenAi Generator
// =============================================================================

/// Client for OpenAI and any host speaking the same API (OpenRouter, Ollama,
/// vLLM, llama.cpp server). Local hosts usually need no API key.
#[derive(Clone)]
pub struct OpenAi {
    api_key: Option<String>,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// A keyless OpenAI-compatible host, e.g. `http://localhost:8000/v1`.
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> OpenAiClient<'_> {
        OpenAiClient::new(&self.http, &self.base_url, self.api_key.as_deref())
    }

    fn chat_request(&self, request: &GenerationRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(WireMessage::system(system.clone()));
        }
        messages.push(WireMessage::user(request.prompt.clone()));

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAi {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.client().chat(&self.chat_request(request)).await
    }

    /// Uses the legacy `/completions` endpoint, which accepts an array of
    /// prompts and answers them in one round trip. A system prompt is
    /// prepended to every prompt.
    async fn generate_batch(&self, prompts: &[String], template: &GenerationRequest) -> Result<Vec<String>> {
        let prompt = prompts
            .iter()
            .map(|p| match &template.system {
                Some(system) => format!("{system}\n\n{p}"),
                None => p.clone(),
            })
            .collect();

        let request = CompletionRequest {
            model: self.model.clone(),
            prompt,
            temperature: template.temperature,
            max_tokens: template.max_tokens,
        };
        self.client().complete(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_includes_system_and_json_mode() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        let request = GenerationRequest::new("hello").system("be brief").temperature(0.7).json();
        let wire = serde_json::to_value(ai.chat_request(&request)).unwrap();

        assert_eq!(wire["model"], "gpt-4o-mini");
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(wire["messages"][1]["content"], "hello");
        assert_eq!(wire["response_format"]["type"], "json_object");
        assert!(wire.get("max_tokens").is_none());
    }

    #[test]
    fn plain_request_omits_optional_fields() {
        let ai = OpenAi::local("http://localhost:8000/v1", "qwen");
        let wire = serde_json::to_value(ai.chat_request(&GenerationRequest::new("hi"))).unwrap();
        assert_eq!(wire["messages"].as_array().unwrap().len(), 1);
        assert!(wire.get("temperature").is_none());
        assert!(wire.get("response_format").is_none());
    }
}
