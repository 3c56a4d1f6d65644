use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use tracing::debug;

const TEMPERATURE: f64 = 0.7;
const MAX_COMPLETION_TOKENS: u64 = 2000;
const CHARS_PER_TOKEN: usize = 4;

/// A system instruction and the user message it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

impl GenerationPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Rough token count, one token per four characters
    pub fn estimated_tokens(&self) -> usize {
        let chars = self.system.chars().count() + self.user.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Text completion backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &GenerationPrompt) -> anyhow::Result<String>;
}

/// [`TextGenerator`] backed by an OpenRouter model through rig
pub struct RigGenerator {
    api_key: String,
    model: String,
}

impl RigGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for RigGenerator {
    async fn generate(&self, prompt: &GenerationPrompt) -> anyhow::Result<String> {
        let client = openrouter::Client::new(&self.api_key);
        let agent = client
            .agent(&self.model)
            .preamble(&prompt.system)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_COMPLETION_TOKENS)
            .build();

        debug!(model = %self.model, tokens = prompt.estimated_tokens(), "Sending prompt");
        let response = agent.prompt(prompt.user.as_str()).await?;
        if response.trim().is_empty() {
            anyhow::bail!("model {} returned an empty response", self.model);
        }
        Ok(response)
    }
}
