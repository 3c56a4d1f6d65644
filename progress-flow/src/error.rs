use thiserror::Error;

/// Errors raised while building or driving a pipeline
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Pipeline cancelled during stage '{stage}'")]
    Cancelled { stage: String },

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),
}

impl FlowError {
    /// Name of the stage the error is attached to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            FlowError::StageFailed { stage, .. } | FlowError::Cancelled { stage } => Some(stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
