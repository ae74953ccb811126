use anyhow::{anyhow, Result};
use ai_client::KeyPool;

/// Secrets and endpoints read from the environment (`.env` supported).
#[derive(Clone, Default)]
pub struct AppConfig {
    pub youtube_api_key: Option<String>,
    pub perspective_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// `GOOGLE_API_KEY` and `GOOGLE_API_KEY_<N>` pairs, as found.
    pub google_api_keys: Vec<(String, String)>,
    /// OpenAI-compatible host for generation (OpenRouter, vLLM, Ollama).
    pub llm_base_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut config = Self::default();
        for (name, value) in vars {
            if value.trim().is_empty() {
                continue;
            }
            match name.as_str() {
                "YOUTUBE_API_KEY" => config.youtube_api_key = Some(value),
                "PERSPECTIVE_API_KEY" => config.perspective_api_key = Some(value),
                "OPENAI_API_KEY" => config.openai_api_key = Some(value),
                "LLM_BASE_URL" => config.llm_base_url = Some(value),
                n if n.starts_with("GOOGLE_API_KEY") => config.google_api_keys.push((n.to_string(), value)),
                _ => {}
            }
        }
        config.google_api_keys.sort();
        config
    }

    pub fn youtube_key(&self) -> Result<&str> {
        self.youtube_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("YOUTUBE_API_KEY environment variable not set"))
    }

    pub fn perspective_key(&self) -> Result<&str> {
        self.perspective_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("PERSPECTIVE_API_KEY environment variable not set"))
    }

    pub fn gemini_keys(&self) -> Result<KeyPool> {
        Ok(KeyPool::from_vars(self.google_api_keys.clone())?)
    }

    /// Log which keys are present without printing them.
    pub fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(4);
            let head = val.get(..n).unwrap_or("");
            format!("{}...({} chars)", head, val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            val.as_deref().map(preview).unwrap_or_else(|| "<not set>".to_string())
        }

        tracing::info!("Environment:");
        tracing::info!("  YOUTUBE_API_KEY: {}", preview_opt(&self.youtube_api_key));
        tracing::info!("  PERSPECTIVE_API_KEY: {}", preview_opt(&self.perspective_api_key));
        tracing::info!("  OPENAI_API_KEY: {}", preview_opt(&self.openai_api_key));
        tracing::info!("  GOOGLE_API_KEY*: {} key(s)", self.google_api_keys.len());
        tracing::info!(
            "  LLM_BASE_URL: {}",
            self.llm_base_url.as_deref().unwrap_or("<not set>")
        );
    }
}
