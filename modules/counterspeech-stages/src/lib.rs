//! Counterspeech research pipeline stages on top of `counterspeech-engine`.

pub mod config;
pub mod external;
pub mod file_config;
pub mod stages;

pub use config::AppConfig;
pub use external::{ExternalError, IntoCall};
pub use file_config::{load_config, parse_config, FileConfig, Provider, ResolvedStage, RunArgs, StageConfig};
pub use stages::{run_stage, Stage};
