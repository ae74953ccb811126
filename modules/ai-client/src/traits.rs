use async_trait::async_trait;

use crate::error::Result;

// =============================================================================
// Request
// =============================================================================

/// One prompt for a text generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON-only reply where it supports it.
    pub json: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
            json: false,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

// =============================================================================
// TextGenerator Trait
// =============================================================================

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, used in logs and output file names.
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate one completion per prompt, in prompt order. Providers with a
    /// native batch endpoint override this; the default sends the prompts
    /// one at a time and stops at the first error.
    async fn generate_batch(&self, prompts: &[String], template: &GenerationRequest) -> Result<Vec<String>> {
        let mut replies = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let request = GenerationRequest {
                prompt: prompt.clone(),
                ..template.clone()
            };
            replies.push(self.generate(&request).await?);
        }
        Ok(replies)
    }
}
