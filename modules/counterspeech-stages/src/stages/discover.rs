//! Video discovery: search queries in, labelled video IDs out.

use std::collections::HashSet;

use async_trait::async_trait;
use counterspeech_engine::{
    Batch, BatchFailure, ProcessingResult, Processor, Projection, RateLimiter, ResultRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use youtube_client::{SearchOptions, YouTubeClient};

use crate::external::IntoCall;

/// Queries used when neither the config nor an input file supplies any.
pub const DEFAULT_QUERIES: [&str; 5] = [
    "travel vlog India",
    "exploring India travel",
    "foreigners in India vlog",
    "Indian travel vlog",
    "backpacking India vlog",
];

pub const DEFAULT_TARGET: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLabel {
    Indian,
    Foreign,
    Unknown,
}

impl ChannelLabel {
    pub fn from_country(country: Option<&str>) -> Self {
        match country {
            None => ChannelLabel::Unknown,
            Some(c) if c.eq_ignore_ascii_case("IN") => ChannelLabel::Indian,
            Some(_) => ChannelLabel::Foreign,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledVideo {
    pub video_id: String,
    pub label: ChannelLabel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
}

pub struct VideoDiscoverer {
    youtube: YouTubeClient,
    search: SearchOptions,
}

impl VideoDiscoverer {
    pub fn new(youtube: YouTubeClient, search: SearchOptions) -> Self {
        Self { youtube, search }
    }

    async fn discover(&self, query: &str, limiter: &RateLimiter) -> ProcessingResult<Vec<LabeledVideo>> {
        let youtube = &self.youtube;
        let search = &self.search;

        let hits = match limiter
            .call("youtube.search", move || async move {
                youtube.search_videos(query, search).await.into_call()
            })
            .await
        {
            Ok(hits) => hits,
            Err(rejected) => return ProcessingResult::failure(format!("search failed: {rejected}")),
        };

        let mut videos = Vec::with_capacity(hits.len());
        for hit in hits {
            let channel_id = hit.channel_id.as_str();
            let label = match limiter
                .call("youtube.channels", move || async move {
                    youtube.channel_country(channel_id).await.into_call()
                })
                .await
            {
                Ok(country) => ChannelLabel::from_country(country.as_deref()),
                Err(rejected) => {
                    warn!(channel_id, error = %rejected, "Channel lookup failed, labelling unknown");
                    ChannelLabel::Unknown
                }
            };
            debug!(video_id = %hit.video_id, ?label, "Labelled video");
            videos.push(LabeledVideo {
                video_id: hit.video_id,
                label,
                title: hit.title,
            });
        }
        ProcessingResult::Success(videos)
    }
}

#[async_trait]
impl Processor for VideoDiscoverer {
    type Output = Vec<LabeledVideo>;

    fn name(&self) -> &str {
        "discover"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        let mut results = Vec::with_capacity(batch.items.len());
        for item in batch.items {
            results.push(self.discover(&item.text, limiter).await);
        }
        Ok(results)
    }
}

/// Unique labelled videos in discovery order, unknown channels dropped,
/// capped at `target`.
#[derive(Debug, Clone)]
pub struct DiscoveredVideos {
    pub target: usize,
}

impl Default for DiscoveredVideos {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET,
        }
    }
}

impl Projection<Vec<LabeledVideo>> for DiscoveredVideos {
    type Output = Vec<LabeledVideo>;

    fn project(&self, records: &[ResultRecord<Vec<LabeledVideo>>]) -> Self::Output {
        let mut seen = HashSet::new();
        records
            .iter()
            .filter_map(|r| r.result.as_ref())
            .flatten()
            .filter(|v| v.label != ChannelLabel::Unknown)
            .filter(|v| seen.insert(v.video_id.clone()))
            .take(self.target)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counterspeech_engine::WorkItem;

    fn video(id: &str, label: ChannelLabel) -> LabeledVideo {
        LabeledVideo {
            video_id: id.into(),
            label,
            title: String::new(),
        }
    }

    fn record(query: &str, videos: Vec<LabeledVideo>) -> ResultRecord<Vec<LabeledVideo>> {
        ResultRecord::new(&WorkItem::new(query, query, "unknown"), ProcessingResult::Success(videos))
    }

    #[test]
    fn country_labels() {
        assert_eq!(ChannelLabel::from_country(Some("IN")), ChannelLabel::Indian);
        assert_eq!(ChannelLabel::from_country(Some("in")), ChannelLabel::Indian);
        assert_eq!(ChannelLabel::from_country(Some("GB")), ChannelLabel::Foreign);
        assert_eq!(ChannelLabel::from_country(None), ChannelLabel::Unknown);
    }

    #[test]
    fn projection_dedups_drops_unknown_and_caps() {
        let records = vec![
            record("q1", vec![video("a", ChannelLabel::Indian), video("b", ChannelLabel::Unknown)]),
            ResultRecord::new(&WorkItem::new("q2", "q2", "unknown"), ProcessingResult::failure("search failed")),
            record(
                "q3",
                vec![
                    video("a", ChannelLabel::Indian),
                    video("c", ChannelLabel::Foreign),
                    video("d", ChannelLabel::Indian),
                ],
            ),
        ];

        let out = DiscoveredVideos { target: 2 }.project(&records);
        let ids: Vec<_> = out.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn output_serializes_video_id_and_label() {
        let json = serde_json::to_value(video("abc", ChannelLabel::Foreign)).unwrap();
        assert_eq!(json, serde_json::json!({"video_id": "abc", "label": "foreign"}));
    }
}
