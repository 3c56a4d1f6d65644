use progress_flow::FlowError;
use thiserror::Error;

/// Errors surfaced by the research assistant components
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No saved documents to generate from, please save at least one article")]
    EmptyInput,

    #[error("Prompt too large: about {estimated_tokens} tokens, limit is {limit}")]
    PromptTooLarge { estimated_tokens: usize, limit: usize },

    #[error("Generation failed in stage '{stage}': {source:#}")]
    GenerationFailed {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Generation was cancelled")]
    Cancelled,

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Pipeline(#[from] FlowError),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
