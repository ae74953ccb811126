pub(crate) mod types;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{AiError, Result};
use crate::traits::{GenerationRequest, TextGenerator};
use crate::util::{retry_after, truncate_to_char_boundary};
use types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// =============================================================================
// Key pool
// =============================================================================

/// API keys handed out round-robin, one per request, to spread the per-key
/// request quota.
pub struct KeyPool {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        let keys: Vec<String> = keys.into_iter().filter(|k| !k.trim().is_empty()).collect();
        if keys.is_empty() {
            return Err(AiError::Config("no Gemini API keys supplied".into()));
        }
        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    /// `GOOGLE_API_KEY_<N>` variables in ascending `N`, falling back to a
    /// single `GOOGLE_API_KEY`.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut numbered = Vec::new();
        let mut single = None;
        for (name, value) in vars {
            if name == "GOOGLE_API_KEY" {
                single = Some(value);
            } else if let Some(n) = name.strip_prefix("GOOGLE_API_KEY_").and_then(|n| n.parse::<u32>().ok()) {
                numbered.push((n, value));
            }
        }
        numbered.sort_by_key(|(n, _)| *n);

        let keys: Vec<String> = if numbered.is_empty() {
            single.into_iter().collect()
        } else {
            numbered.into_iter().map(|(_, key)| key).collect()
        };
        Self::new(keys).map_err(|_| {
            AiError::Config("set GOOGLE_API_KEY_<N> or GOOGLE_API_KEY in the environment".into())
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next key and its 1-based position in the pool.
    pub fn next_key(&self) -> (usize, &str) {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        (i + 1, &self.keys[i])
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool").field("keys", &self.keys.len()).finish()
    }
}

// =============================================================================
// Gemini Generator
// =============================================================================

#[derive(Clone)]
pub struct Gemini {
    keys: Arc<KeyPool>,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl Gemini {
    pub fn new(keys: KeyPool, model: impl Into<String>) -> Self {
        Self {
            keys: Arc::new(keys),
            model: model.into(),
            base_url: GEMINI_API_URL.to_string(),
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

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn wire_request(request: &GenerationRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content::user(request.prompt.clone())],
            system_instruction: request.system.clone().map(Content::system),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json.then_some("application/json"),
            },
        }
    }
}

#[async_trait]
impl TextGenerator for Gemini {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let (key_index, key) = self.keys.next_key();

        debug!(model = %self.model, key = key_index, keys = self.keys.len(), "Gemini generateContent request");

        let response = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .json(&Self::wire_request(request))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(key = key_index, "Gemini key throttled");
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

        let body: GenerateContentResponse = response.json().await?;
        let finish_reason = body
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());
        body.text().ok_or_else(|| {
            debug!(finish_reason = ?finish_reason, "Gemini returned no text");
            AiError::EmptyResponse("Gemini")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn numbered_keys_are_ordered_and_preferred() {
        let pool = KeyPool::from_vars(vars(&[
            ("GOOGLE_API_KEY_2", "b"),
            ("GOOGLE_API_KEY", "single"),
            ("GOOGLE_API_KEY_10", "c"),
            ("GOOGLE_API_KEY_1", "a"),
        ]))
        .unwrap();

        let order: Vec<_> = (0..4).map(|_| pool.next_key().1.to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn falls_back_to_single_key() {
        let pool = KeyPool::from_vars(vars(&[("GOOGLE_API_KEY", "only")])).unwrap();
        assert_eq!(pool.next_key(), (1, "only"));
        assert_eq!(pool.next_key(), (1, "only"));
    }

    #[test]
    fn empty_pool_is_a_config_error() {
        let err = KeyPool::from_vars(vars(&[("GOOGLE_API_KEY_1", "  ")])).unwrap_err();
        assert!(matches!(err, AiError::Config(_)));
    }

    #[test]
    fn json_mode_sets_response_mime_type() {
        let request = GenerationRequest::new("classify").system("you are terse").json();
        let wire = serde_json::to_value(Gemini::wire_request(&request)).unwrap();
        assert_eq!(wire["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "you are terse");
        assert_eq!(wire["contents"][0]["role"], "user");
    }
}
