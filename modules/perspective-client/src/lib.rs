pub mod error;

pub use error::{PerspectiveError, Result};

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;

const BASE_URL: &str = "https://commentanalyzer.googleapis.com/v1alpha1";

/// Attributes scored for counterspeech replies.
pub const DEFAULT_ATTRIBUTES: [&str; 5] = [
    "TOXICITY",
    "SEVERE_TOXICITY",
    "INSULT",
    "PROFANITY",
    "IDENTITY_ATTACK",
];

/// Summary score per requested attribute; `None` when the response omits it.
pub type Scores = BTreeMap<String, Option<f64>>;

pub struct PerspectiveClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PerspectiveClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Score `text` on each of `attributes`.
    pub async fn analyze(&self, text: &str, attributes: &[&str], languages: &[&str]) -> Result<Scores> {
        let endpoint = format!("{}/comments:analyze", self.base_url);

        let requested: serde_json::Map<String, serde_json::Value> = attributes
            .iter()
            .map(|a| (a.to_string(), serde_json::json!({})))
            .collect();
        let body = serde_json::json!({
            "comment": { "text": text },
            "languages": languages,
            "requestedAttributes": requested,
        });

        let resp = self
            .client
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(resp.headers());
            return Err(PerspectiveError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PerspectiveError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw = resp.text().await?;
        let parsed: AnalyzeResponse =
            serde_json::from_str(&raw).map_err(|e| PerspectiveError::Parse(e.to_string()))?;

        tracing::debug!(attributes = parsed.attribute_scores.len(), "Perspective scores received");

        Ok(attributes
            .iter()
            .map(|a| {
                let score = parsed.attribute_scores.get(*a).map(|s| s.summary_score.value);
                (a.to_string(), score)
            })
            .collect())
    }
}

/// `Retry-After` in (possibly fractional) seconds. HTTP-date values are
/// ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    attribute_scores: BTreeMap<String, AttributeScore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Debug, Deserialize)]
struct SummaryScore {
    value: f64,
}
