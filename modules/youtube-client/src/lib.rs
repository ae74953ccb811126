pub mod error;
pub mod types;

pub use error::{Result, YouTubeError};
pub use types::{CommentPage, SearchHit, SearchOptions};

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use types::{
    ChannelSnippet, CommentThreadSnippet, ErrorEnvelope, ListResponse, SearchItem, SnippetItem,
    VideoSnippet,
};

const BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Largest page `commentThreads.list` will return.
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct YouTubeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YouTubeClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Title of a video, `None` if the ID doesn't resolve.
    pub async fn video_title(&self, video_id: &str) -> Result<Option<String>> {
        let resp: ListResponse<SnippetItem<VideoSnippet>> = self
            .get("videos", &[("part", "snippet"), ("id", video_id)])
            .await?;
        Ok(resp.items.into_iter().next().map(|item| item.snippet.title))
    }

    /// One page of plain-text top-level comments.
    pub async fn comment_threads_page(
        &self,
        video_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<CommentPage> {
        let max_results = max_results.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query = vec![
            ("part", "snippet"),
            ("videoId", video_id),
            ("maxResults", max_results.as_str()),
            ("textFormat", "plainText"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let resp: ListResponse<SnippetItem<CommentThreadSnippet>> =
            self.get("commentThreads", &query).await?;

        tracing::debug!(video_id, comments = resp.items.len(), has_next = resp.next_page_token.is_some(), "Fetched comment page");

        Ok(CommentPage {
            comments: resp
                .items
                .into_iter()
                .map(|item| item.snippet.top_level_comment.snippet.text_display)
                .collect(),
            next_page_token: resp.next_page_token,
        })
    }

    /// Video search. Results without a video ID (channels, playlists) are
    /// skipped.
    pub async fn search_videos(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let max_results = options.max_results.to_string();
        let resp: ListResponse<SearchItem> = self
            .get(
                "search",
                &[
                    ("q", query),
                    ("part", "id,snippet"),
                    ("type", "video"),
                    ("maxResults", max_results.as_str()),
                    ("regionCode", options.region_code.as_str()),
                    ("relevanceLanguage", options.relevance_language.as_str()),
                    ("videoDuration", options.video_duration.as_str()),
                    ("order", options.order.as_str()),
                ],
            )
            .await?;

        Ok(resp
            .items
            .into_iter()
            .filter_map(|item| {
                Some(SearchHit {
                    video_id: item.id.video_id?,
                    channel_id: item.snippet.channel_id,
                    title: item.snippet.title,
                })
            })
            .collect())
    }

    /// Country a channel declares, if any.
    pub async fn channel_country(&self, channel_id: &str) -> Result<Option<String>> {
        let resp: ListResponse<SnippetItem<ChannelSnippet>> = self
            .get("channels", &[("part", "snippet"), ("id", channel_id)])
            .await?;
        Ok(resp.items.into_iter().next().and_then(|item| item.snippet.country))
    }

    async fn get<T: DeserializeOwned>(&self, resource: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), resource);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, &body, retry_after));
        }

        Ok(resp.json().await?)
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

/// Map a failed response onto a throttle, a spent quota, or a hard error.
fn classify(status: StatusCode, body: &str, retry_after: Option<Duration>) -> YouTubeError {
    let (reason, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope
                .error
                .errors
                .into_iter()
                .next()
                .map(|e| e.reason)
                .unwrap_or_default(),
            envelope.error.message,
        ),
        Err(_) => (String::new(), body.to_string()),
    };

    match (status, reason.as_str()) {
        (StatusCode::TOO_MANY_REQUESTS, _)
        | (StatusCode::FORBIDDEN, "rateLimitExceeded" | "userRateLimitExceeded") => {
            YouTubeError::RateLimited { retry_after }
        }
        (StatusCode::FORBIDDEN, "quotaExceeded" | "dailyLimitExceeded") => YouTubeError::QuotaExceeded(message),
        _ => YouTubeError::Api {
            status: status.as_u16(),
            reason,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_error(code: u16, reason: &str) -> String {
        serde_json::json!({
            "error": {"code": code, "message": format!("{reason} happened"), "errors": [{"reason": reason}]}
        })
        .to_string()
    }

    #[test]
    fn per_minute_limits_are_throttles() {
        let err = classify(StatusCode::FORBIDDEN, &google_error(403, "rateLimitExceeded"), None);
        assert!(err.is_rate_limited());
        let err = classify(StatusCode::TOO_MANY_REQUESTS, "", Some(Duration::from_secs(4)));
        assert!(matches!(err, YouTubeError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(4)));
    }

    #[test]
    fn daily_quota_is_a_hard_error() {
        let err = classify(StatusCode::FORBIDDEN, &google_error(403, "quotaExceeded"), None);
        assert!(matches!(err, YouTubeError::QuotaExceeded(ref m) if m == "quotaExceeded happened"));
    }

    #[test]
    fn other_forbidden_reasons_keep_their_reason() {
        let err = classify(StatusCode::FORBIDDEN, &google_error(403, "commentsDisabled"), None);
        match err {
            YouTubeError::Api { status, reason, .. } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "commentsDisabled");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_is_kept_as_message() {
        let err = classify(StatusCode::BAD_GATEWAY, "upstream down", None);
        assert!(matches!(err, YouTubeError::Api { status: 502, ref message, .. } if message == "upstream down"));
    }

    #[test]
    fn retry_after_accepts_fractional_seconds() {
        use reqwest::header::HeaderValue;

        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(1500)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(retry_after(&headers), None);
    }
}
