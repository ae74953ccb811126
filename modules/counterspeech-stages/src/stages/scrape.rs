//! Comment scraping: video IDs in, `{video_id, title, comments}` records out.

use async_trait::async_trait;
use counterspeech_engine::{
    Batch, BatchFailure, ProcessingResult, Processor, Projection, RateLimiter, Rejected,
    ResultRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use youtube_client::{YouTubeClient, MAX_PAGE_SIZE};

use crate::external::IntoCall;

pub const DEFAULT_MAX_COMMENTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoComments {
    pub title: Option<String>,
    pub comments: Vec<String>,
}

pub struct CommentScraper {
    youtube: YouTubeClient,
    max_comments: usize,
}

impl CommentScraper {
    pub fn new(youtube: YouTubeClient, max_comments: usize) -> Self {
        Self {
            youtube,
            max_comments,
        }
    }

    async fn scrape(&self, video_id: &str, limiter: &RateLimiter) -> Result<VideoComments, Rejected> {
        let youtube = &self.youtube;

        let title = limiter
            .call("youtube.videos", move || async move {
                youtube.video_title(video_id).await.into_call()
            })
            .await?;

        let mut comments = Vec::new();
        let mut next_page: Option<String> = None;
        while comments.len() < self.max_comments {
            let wanted = (self.max_comments - comments.len()).min(MAX_PAGE_SIZE as usize) as u32;
            let token = next_page.as_deref();
            let page = limiter
                .call("youtube.commentThreads", move || async move {
                    youtube
                        .comment_threads_page(video_id, token, wanted)
                        .await
                        .into_call()
                })
                .await?;

            debug!(video_id, fetched = page.comments.len(), total = comments.len(), "Comment page");
            comments.extend(page.comments);
            match page.next_page_token {
                Some(token) => next_page = Some(token),
                None => break,
            }
        }
        comments.truncate(self.max_comments);

        info!(video_id, comments = comments.len(), "Scraped video");
        Ok(VideoComments { title, comments })
    }
}

#[async_trait]
impl Processor for CommentScraper {
    type Output = VideoComments;

    fn name(&self) -> &str {
        "scrape"
    }

    async fn process(
        &self,
        batch: &Batch<'_>,
        limiter: &RateLimiter,
    ) -> Result<Vec<ProcessingResult<Self::Output>>, BatchFailure> {
        let mut results = Vec::with_capacity(batch.len());
        for item in batch.iter() {
            results.push(self.scrape(&item.text, limiter).await.into());
        }
        Ok(results)
    }
}

/// One row per scraped video. Failed videos keep their ID with no comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedVideo {
    pub video_id: String,
    pub title: Option<String>,
    pub comments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapedVideos;

impl Projection<VideoComments> for ScrapedVideos {
    type Output = Vec<ScrapedVideo>;

    fn project(&self, records: &[ResultRecord<VideoComments>]) -> Self::Output {
        records
            .iter()
            .map(|r| {
                let (title, comments) = match &r.result {
                    Some(v) => (v.title.clone(), v.comments.clone()),
                    None => (None, Vec::new()),
                };
                ScrapedVideo {
                    video_id: r.text.clone(),
                    title,
                    comments,
                    error: r.error.clone(),
                }
            })
            .collect()
    }
}
