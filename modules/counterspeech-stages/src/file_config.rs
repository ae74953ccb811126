use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use counterspeech_engine::{CorpusOptions, IdentityPolicy, PipelineConfig};
use serde::Deserialize;
use youtube_client::SearchOptions;

use crate::stages::{GenerationMode, Stage};

/// Top-level shape of `counterspeech.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub pipeline: PipelineDefaults,
    #[serde(default)]
    pub stages: StageTables,
}

/// `[pipeline]`: defaults shared by every stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineDefaults {
    /// Root for every default input/output path.
    pub data_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub inter_call_delay_seconds: Option<f64>,
    pub rate_limit_backoff_seconds: Option<f64>,
    pub call_timeout_seconds: Option<f64>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageTables {
    pub discover: StageConfig,
    pub scrape: StageConfig,
    pub clean: StageConfig,
    pub filter: StageConfig,
    pub generate: StageConfig,
    pub score: StageConfig,
}

impl StageTables {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Discover => &self.discover,
            Stage::Scrape => &self.scrape,
            Stage::Clean => &self.clean,
            Stage::Filter => &self.filter,
            Stage::Generate => &self.generate,
            Stage::Score => &self.score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Any OpenAI-compatible host (OpenAI, OpenRouter, vLLM, Ollama).
    OpenAi,
    Gemini,
}

/// `[stages.<name>]`. Every key is optional; unset keys fall back to
/// `[pipeline]` and then to the stage's built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageConfig {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub skipped_batches: Option<PathBuf>,

    pub batch_size: Option<usize>,
    pub inter_call_delay_seconds: Option<f64>,
    pub rate_limit_backoff_seconds: Option<f64>,
    pub call_timeout_seconds: Option<f64>,
    pub max_items: Option<usize>,

    pub dedup: Option<bool>,
    pub identity: Option<IdentityPolicy>,
    pub languages: Option<Vec<String>>,
    pub default_language: Option<String>,
    pub corpus_section: Option<String>,
    pub text_field: Option<String>,
    pub language_field: Option<String>,
    pub source_field: Option<String>,

    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub mode: Option<GenerationMode>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,

    /// discover
    pub queries: Option<Vec<String>>,
    pub target: Option<usize>,
    pub search: Option<SearchOptions>,
    /// scrape
    pub max_comments: Option<usize>,
    /// score
    pub attributes: Option<Vec<String>>,
    pub request_languages: Option<Vec<String>>,
}

/// Command-line overrides; these win over everything in the file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// Corpus file to read
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Final output file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Checkpoint file (defaults to <output>.checkpoint.json)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds between consecutive external calls
    #[arg(long)]
    pub delay: Option<f64>,

    /// Only process the first N items
    #[arg(long)]
    pub max_items: Option<usize>,
}

/// Everything a stage run needs, after file, CLI and built-in defaults are
/// layered.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub stage: Stage,
    /// `None` only for discover without an input file: queries come from config.
    pub input: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub corpus: CorpusOptions,
    pub settings: StageConfig,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<FileConfig> {
    Ok(toml::from_str(contents)?)
}

impl FileConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.pipeline.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Layer CLI > `[stages.<name>]` > `[pipeline]` > built-in defaults.
    pub fn resolve(&self, stage: Stage, args: &RunArgs) -> Result<ResolvedStage> {
        let table = self.stages.get(stage);
        let defaults = stage.defaults();
        let data_dir = self.data_dir();

        let input = args
            .input
            .clone()
            .or_else(|| table.input.clone())
            .or_else(|| self.default_input(stage));
        let output = args
            .output
            .clone()
            .or_else(|| table.output.clone())
            .unwrap_or_else(|| self.default_output(stage));
        let checkpoint = args
            .checkpoint
            .clone()
            .or_else(|| table.checkpoint.clone())
            .unwrap_or_else(|| checkpoint_for(&output));
        let skipped = table
            .skipped_batches
            .clone()
            .or_else(|| defaults.skipped_batches.map(|p| data_dir.join(p)));

        let mut pipeline = PipelineConfig::new(checkpoint, output);
        pipeline.batch_size = args
            .batch_size
            .or(table.batch_size)
            .or(self.pipeline.batch_size)
            .unwrap_or(defaults.batch_size);
        pipeline.inter_call_delay_seconds = args
            .delay
            .or(table.inter_call_delay_seconds)
            .or(self.pipeline.inter_call_delay_seconds)
            .unwrap_or(defaults.inter_call_delay_seconds);
        if let Some(backoff) = table
            .rate_limit_backoff_seconds
            .or(self.pipeline.rate_limit_backoff_seconds)
        {
            pipeline.rate_limit_backoff_seconds = backoff;
        }
        if let Some(timeout) = table.call_timeout_seconds.or(self.pipeline.call_timeout_seconds) {
            pipeline.call_timeout_seconds = Some(timeout).filter(|t| *t > 0.0);
        }
        pipeline.skipped_batches_path = skipped;
        pipeline.max_items = args.max_items.or(table.max_items).or(self.pipeline.max_items);
        pipeline.validate().context("Invalid pipeline settings")?;

        let mut corpus = defaults.corpus;
        if let Some(v) = table.dedup {
            corpus.dedup = v;
        }
        if let Some(v) = table.identity {
            corpus.identity = v;
        }
        if let Some(v) = &table.languages {
            corpus.languages = Some(v.clone());
        }
        if let Some(v) = &table.default_language {
            corpus.default_language = v.clone();
        }
        if let Some(v) = &table.corpus_section {
            corpus.section = Some(v.clone());
        }
        if let Some(v) = &table.text_field {
            corpus.text_field = v.clone();
        }
        if let Some(v) = &table.language_field {
            corpus.language_field = v.clone();
        }
        if let Some(v) = &table.source_field {
            corpus.source_field = v.clone();
        }

        Ok(ResolvedStage {
            stage,
            input,
            pipeline,
            corpus,
            settings: table.clone(),
        })
    }

    fn default_input(&self, stage: Stage) -> Option<PathBuf> {
        match stage {
            Stage::Discover => None,
            Stage::Score => Some(
                self.stages
                    .generate
                    .output
                    .clone()
                    .unwrap_or_else(|| self.default_output(Stage::Generate)),
            ),
            other => other.defaults().input.map(|p| self.data_dir().join(p)),
        }
    }

    fn default_output(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Generate => self.data_dir().join(generation_output(&self.generation_model())),
            other => self.data_dir().join(other.defaults().output),
        }
    }

    /// Model the generate stage will use.
    pub fn generation_model(&self) -> String {
        let table = &self.stages.generate;
        table
            .model
            .clone()
            .unwrap_or_else(|| default_model(table.provider.unwrap_or(Provider::OpenAi)).to_string())
    }
}

pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Gemini => "gemini-2.5-flash-lite",
    }
}

/// `counterspeech/<model>_responses.json`, with the model name made path-safe.
fn generation_output(model: &str) -> PathBuf {
    let slug: String = model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    PathBuf::from("counterspeech").join(format!("{slug}_responses.json"))
}

/// `out.json` → `out.checkpoint.json`, next to the output.
pub fn checkpoint_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}.checkpoint.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_stage_defaults() {
        let config = parse_config("").unwrap();
        let clean = config.resolve(Stage::Clean, &RunArgs::default()).unwrap();

        assert_eq!(clean.input.as_deref(), Some(Path::new("data/raw/youtube_comments.json")));
        assert_eq!(clean.pipeline.final_output_path, PathBuf::from("data/clean/final_API_data.json"));
        assert_eq!(
            clean.pipeline.checkpoint_path,
            PathBuf::from("data/clean/final_API_data.checkpoint.json")
        );
        assert_eq!(clean.pipeline.batch_size, 25);
        assert_eq!(clean.corpus.text_field, "comments");
        assert!(clean.pipeline.skipped_batches_path.is_some());
    }

    #[test]
    fn stage_table_beats_pipeline_table_and_cli_beats_both() {
        let config = parse_config(
            r#"
            [pipeline]
            batch_size = 8
            inter_call_delay_seconds = 0.5

            [stages.score]
            batch_size = 4
            dedup = true
            "#,
        )
        .unwrap();

        let score = config.resolve(Stage::Score, &RunArgs::default()).unwrap();
        assert_eq!(score.pipeline.batch_size, 4);
        assert_eq!(score.pipeline.inter_call_delay_seconds, 0.5);
        assert!(score.corpus.dedup);

        let args = RunArgs {
            batch_size: Some(2),
            delay: Some(0.0),
            max_items: Some(10),
            ..Default::default()
        };
        let score = config.resolve(Stage::Score, &args).unwrap();
        assert_eq!(score.pipeline.batch_size, 2);
        assert_eq!(score.pipeline.inter_call_delay_seconds, 0.0);
        assert_eq!(score.pipeline.max_items, Some(10));
    }

    #[test]
    fn score_reads_what_generate_writes() {
        let config = parse_config(
            r#"
            [stages.generate]
            provider = "openai"
            model = "qwen/qwen-2.5-7b-instruct"
            mode = "batch"
            "#,
        )
        .unwrap();

        let generate = config.resolve(Stage::Generate, &RunArgs::default()).unwrap();
        let score = config.resolve(Stage::Score, &RunArgs::default()).unwrap();
        assert_eq!(
            generate.pipeline.final_output_path,
            PathBuf::from("data/counterspeech/qwen_qwen-2.5-7b-instruct_responses.json")
        );
        assert_eq!(score.input.as_ref(), Some(&generate.pipeline.final_output_path));
        assert_eq!(score.corpus.text_field, "output");
        assert!(!score.corpus.dedup);
        assert_eq!(generate.settings.mode, Some(GenerationMode::Batch));
    }

    #[test]
    fn shipped_config_resolves_for_every_stage() {
        let config = parse_config(include_str!("../../../counterspeech.toml")).unwrap();
        for stage in Stage::ALL {
            config.resolve(stage, &RunArgs::default()).unwrap();
        }
        assert_eq!(config.stages.discover.search.as_ref().unwrap().region_code, "IN");
        assert_eq!(config.stages.clean.provider, Some(Provider::Gemini));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_config("[stages.clean]\nbatchsize = 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("unknown field"));

        assert!(parse_config("[stages.translate]\n").is_err());
    }

    #[test]
    fn invalid_values_fail_resolution() {
        let config = parse_config("[stages.filter]\nbatch_size = 0\n").unwrap();
        assert!(config.resolve(Stage::Filter, &RunArgs::default()).is_err());
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = parse_config("[pipeline]\ncall_timeout_seconds = 0.0\n").unwrap();
        let scrape = config.resolve(Stage::Scrape, &RunArgs::default()).unwrap();
        assert_eq!(scrape.pipeline.call_timeout_seconds, None);
    }
}
