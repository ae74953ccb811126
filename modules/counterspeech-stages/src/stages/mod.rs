//! The six research pipeline stages and their wiring onto the engine.
//!
//! discover → scrape → clean → filter → generate → score. Each stage reads
//! the previous stage's output by default.

pub mod clean;
pub mod discover;
pub mod filter;
pub mod generate;
pub mod score;
pub mod scrape;

pub use clean::{CleanedComment, CleanedGroups, CommentCleaner};
pub use discover::{ChannelLabel, DiscoveredVideos, LabeledVideo, VideoDiscoverer};
pub use filter::{FilterOutput, Relevance, RelevanceFilter, RelevanceSplit};
pub use generate::{CounterspeechGenerator, GenerationMode};
pub use score::ToxicityScorer;
pub use scrape::{CommentScraper, ScrapedVideo, ScrapedVideos, VideoComments};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ai_client::{Gemini, OpenAi, TextGenerator};
use anyhow::{bail, Context, Result};
use counterspeech_engine::{
    CorpusOptions, Engine, Processor, Projection, RecordList, RunSummary, WorkItem, WorkSource,
};
use perspective_client::PerspectiveClient;
use tracing::info;
use youtube_client::YouTubeClient;

use crate::config::AppConfig;
use crate::file_config::{default_model, Provider, ResolvedStage, StageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discover,
    Scrape,
    Clean,
    Filter,
    Generate,
    Score,
}

/// Built-in settings a stage falls back to when neither the CLI nor the
/// config file say otherwise. Paths are relative to the data directory.
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub input: Option<&'static str>,
    pub output: &'static str,
    pub skipped_batches: Option<&'static str>,
    pub batch_size: usize,
    pub inter_call_delay_seconds: f64,
    pub corpus: CorpusOptions,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Discover,
        Stage::Scrape,
        Stage::Clean,
        Stage::Filter,
        Stage::Generate,
        Stage::Score,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Discover => "discover",
            Stage::Scrape => "scrape",
            Stage::Clean => "clean",
            Stage::Filter => "filter",
            Stage::Generate => "generate",
            Stage::Score => "score",
        }
    }

    pub fn defaults(self) -> StageDefaults {
        let corpus = CorpusOptions::default();
        match self {
            Stage::Discover => StageDefaults {
                input: None,
                output: "util/video_ids.json",
                skipped_batches: None,
                batch_size: 1,
                inter_call_delay_seconds: 0.3,
                corpus,
            },
            Stage::Scrape => StageDefaults {
                input: Some("util/video_ids.json"),
                output: "raw/youtube_comments.json",
                skipped_batches: None,
                batch_size: 1,
                inter_call_delay_seconds: 0.3,
                corpus: CorpusOptions {
                    text_field: "video_id".into(),
                    ..corpus
                },
            },
            Stage::Clean => StageDefaults {
                input: Some("raw/youtube_comments.json"),
                output: "clean/final_API_data.json",
                skipped_batches: Some("clean/skipped_batches.json"),
                batch_size: 25,
                inter_call_delay_seconds: 4.0,
                corpus: CorpusOptions {
                    text_field: "comments".into(),
                    ..corpus
                },
            },
            Stage::Filter => StageDefaults {
                input: Some("clean/final_API_data.json"),
                output: "clean/filtered_data.json",
                skipped_batches: None,
                batch_size: 10,
                inter_call_delay_seconds: 0.2,
                corpus: CorpusOptions {
                    languages: Some(vec!["rom_hindi".into(), "english".into()]),
                    ..corpus
                },
            },
            Stage::Generate => StageDefaults {
                input: Some("clean/filtered_data.json"),
                output: "counterspeech/responses.json",
                skipped_batches: Some("counterspeech/skipped_batches.json"),
                batch_size: 8,
                inter_call_delay_seconds: 1.0,
                corpus: CorpusOptions {
                    section: Some("relevant".into()),
                    ..corpus
                },
            },
            Stage::Score => StageDefaults {
                input: None,
                output: "analysis/perspective_scores.json",
                skipped_batches: None,
                batch_size: 10,
                inter_call_delay_seconds: 1.1,
                corpus: CorpusOptions {
                    text_field: "output".into(),
                    dedup: false,
                    ..corpus
                },
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Build the stage's processor and projection and run it to completion.
pub async fn run_stage(resolved: &ResolvedStage, env: &AppConfig) -> Result<RunSummary> {
    let settings = &resolved.settings;
    let timeout = http_timeout(resolved);
    let items = load_items(resolved)?;
    info!(stage = %resolved.stage, items = items.len(), output = %resolved.pipeline.final_output_path.display(), "Stage ready");

    match resolved.stage {
        Stage::Discover => {
            let processor = VideoDiscoverer::new(youtube(env, timeout)?, settings.search.clone().unwrap_or_default());
            let projection = DiscoveredVideos {
                target: settings.target.unwrap_or(discover::DEFAULT_TARGET),
            };
            execute(processor, projection, resolved, items).await
        }
        Stage::Scrape => {
            let max_comments = settings.max_comments.unwrap_or(scrape::DEFAULT_MAX_COMMENTS);
            execute(CommentScraper::new(youtube(env, timeout)?, max_comments), ScrapedVideos, resolved, items).await
        }
        Stage::Clean => {
            let generator = text_generator(settings, env, Provider::Gemini, timeout)?;
            execute(CommentCleaner::new(generator), CleanedGroups, resolved, items).await
        }
        Stage::Filter => {
            let generator = text_generator(settings, env, Provider::Gemini, timeout)?;
            execute(RelevanceFilter::new(generator), RelevanceSplit, resolved, items).await
        }
        Stage::Generate => {
            let generator = text_generator(settings, env, Provider::OpenAi, timeout)?;
            let mut processor = CounterspeechGenerator::new(generator, settings.mode.unwrap_or_default());
            if let Some(t) = settings.temperature {
                processor = processor.with_temperature(t);
            }
            if let Some(m) = settings.max_tokens {
                processor = processor.with_max_tokens(m);
            }
            execute(processor, RecordList, resolved, items).await
        }
        Stage::Score => {
            let mut client = PerspectiveClient::new(env.perspective_key()?)?;
            if let Some(timeout) = timeout {
                client = client.with_timeout(timeout)?;
            }
            let mut scorer = ToxicityScorer::new(client);
            if let Some(attributes) = &settings.attributes {
                scorer = scorer.with_attributes(attributes.clone());
            }
            if let Some(languages) = &settings.request_languages {
                scorer = scorer.with_languages(languages.clone());
            }
            execute(scorer, RecordList, resolved, items).await
        }
    }
}

async fn execute<P, J>(processor: P, projection: J, resolved: &ResolvedStage, items: Vec<WorkItem>) -> Result<RunSummary>
where
    P: Processor,
    J: Projection<P::Output>,
{
    let engine = Engine::new(processor, projection, resolved.pipeline.clone())?;
    Ok(engine.run_items(items).await?)
}

/// Read the stage's corpus. Discover without an input file searches the
/// configured queries instead.
pub fn load_items(resolved: &ResolvedStage) -> Result<Vec<WorkItem>> {
    match &resolved.input {
        Some(path) => WorkSource::new(path, resolved.corpus.clone())
            .load()
            .with_context(|| format!("Failed to load {} input", resolved.stage)),
        None if resolved.stage == Stage::Discover => {
            let queries: Vec<String> = match &resolved.settings.queries {
                Some(queries) => queries.clone(),
                None => discover::DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
            };
            Ok(WorkSource::new("<queries>", resolved.corpus.clone()).from_value(serde_json::json!(queries))?)
        }
        None => bail!("No input file for stage {}", resolved.stage),
    }
}

/// HTTP clients give up alongside the limiter's per-call timeout.
fn http_timeout(resolved: &ResolvedStage) -> Option<Duration> {
    resolved.pipeline.call_timeout_seconds.map(Duration::from_secs_f64)
}

fn youtube(env: &AppConfig, timeout: Option<Duration>) -> Result<YouTubeClient> {
    let client = YouTubeClient::new(env.youtube_key()?.to_string());
    Ok(match timeout {
        Some(timeout) => client.with_timeout(timeout)?,
        None => client,
    })
}

fn text_generator(
    settings: &StageConfig,
    env: &AppConfig,
    fallback: Provider,
    timeout: Option<Duration>,
) -> Result<Arc<dyn TextGenerator>> {
    let provider = settings.provider.unwrap_or(fallback);
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string());

    let generator: Arc<dyn TextGenerator> = match provider {
        Provider::OpenAi => {
            let base_url = settings.base_url.clone().or_else(|| env.llm_base_url.clone());
            let openai = match (&env.openai_api_key, base_url) {
                (Some(key), Some(url)) => OpenAi::new(key.clone(), model).with_base_url(url),
                (Some(key), None) => OpenAi::new(key.clone(), model),
                (None, Some(url)) => OpenAi::local(url, model),
                (None, None) => bail!("Set OPENAI_API_KEY, or a base_url / LLM_BASE_URL for a local host"),
            };
            match timeout {
                Some(timeout) => Arc::new(openai.with_timeout(timeout)?),
                None => Arc::new(openai),
            }
        }
        Provider::Gemini => {
            let mut gemini = Gemini::new(env.gemini_keys()?, model);
            if let Some(url) = &settings.base_url {
                gemini = gemini.with_base_url(url.clone());
            }
            if let Some(timeout) = timeout {
                gemini = gemini.with_timeout(timeout)?;
            }
            info!(keys = gemini.key_count(), "Gemini key pool ready");
            Arc::new(gemini)
        }
    };
    info!(model = generator.model(), "Text generator ready");
    Ok(generator)
}
