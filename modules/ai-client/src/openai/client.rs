use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use super::types::*;
use crate::error::{AiError, Result};
use crate::util::{retry_after, truncate_to_char_boundary};

pub(crate) const OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiClient<'a> {
    api_key: Option<&'a str>,
    http: &'a reqwest::Client,
    base_url: &'a str,
}

impl<'a> OpenAiClient<'a> {
    pub fn new(http: &'a reqwest::Client, base_url: &'a str, api_key: Option<&'a str>) -> Self {
        Self {
            api_key,
            http,
            base_url,
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| AiError::Config(format!("invalid API key: {e}")))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        debug!(model = %request.model, "OpenAI chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AiError::EmptyResponse("chat completion"))
    }

    /// One `/completions` request carrying every prompt. Replies come back
    /// reordered by choice index.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>> {
        let url = format!("{}/completions", self.base_url.trim_end_matches('/'));

        debug!(model = %request.model, prompts = request.prompt.len(), "OpenAI batch completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut completion: CompletionResponse = response.json().await?;
        completion.choices.sort_by_key(|c| c.index);

        Ok(completion.choices.into_iter().map(|c| c.text).collect())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AiError::RateLimited {
            retry_after: retry_after(response.headers()),
        });
    }
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(AiError::Api {
            status: status.as_u16(),
            message: truncate_to_char_boundary(&error_text, 500).to_string(),
        });
    }
    Ok(response)
}
