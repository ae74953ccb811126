use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use counterspeech_stages::{load_config, run_stage, AppConfig, FileConfig, RunArgs, Stage};

#[derive(Parser)]
#[command(name = "counterspeech")]
#[command(about = "Resumable data pipeline for counterspeech research on YouTube comments")]
#[command(version)]
struct Cli {
    /// Pipeline config file (TOML). Built-in defaults apply when absent.
    #[arg(short, long, global = true, default_value = "counterspeech.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search YouTube and label videos by channel country
    Discover(RunArgs),

    /// Fetch titles and top-level comments for video IDs
    Scrape(RunArgs),

    /// Classify comment language and strip emojis with an LLM
    Clean(RunArgs),

    /// Keep comments that generalize about India or its people
    Filter(RunArgs),

    /// Generate counterspeech replies to relevant comments
    Generate(RunArgs),

    /// Score generated replies with Perspective
    Score(RunArgs),
}

impl Commands {
    fn split(self) -> (Stage, RunArgs) {
        match self {
            Commands::Discover(args) => (Stage::Discover, args),
            Commands::Scrape(args) => (Stage::Scrape, args),
            Commands::Clean(args) => (Stage::Clean, args),
            Commands::Filter(args) => (Stage::Filter, args),
            Commands::Generate(args) => (Stage::Generate, args),
            Commands::Score(args) => (Stage::Score, args),
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("counterspeech=info".parse()?)
                .add_directive("counterspeech_engine=info".parse()?)
                .add_directive("counterspeech_stages=info".parse()?),
        )
        .init();

    let (stage, args) = cli.command.split();
    info!(%stage, "Counterspeech pipeline starting...");

    let file_config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file, using built-in defaults");
        FileConfig::default()
    };
    let resolved = file_config.resolve(stage, &args)?;

    let env = AppConfig::from_env();
    env.log_keys();

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(run_stage(&resolved, &env))?;

    info!("Stage {stage} complete. {summary}");
    println!("{summary}");
    Ok(())
}
