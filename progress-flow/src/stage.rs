use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::Context;

/// How a stage's synthetic progress advances
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKind {
    /// Exactly 10 increments of 10 over a fixed wall-clock duration
    FixedDuration,
    /// Equal increments at a tick interval divided by `speed_factor`
    VariableSpeed { speed_factor: f64 },
}

impl StageKind {
    pub fn variable(speed_factor: f64) -> Self {
        StageKind::VariableSpeed { speed_factor }
    }

    pub fn is_fixed_duration(&self) -> bool {
        matches!(self, StageKind::FixedDuration)
    }

    pub fn speed_factor(&self) -> Option<f64> {
        match self {
            StageKind::FixedDuration => None,
            StageKind::VariableSpeed { speed_factor } => Some(*speed_factor),
        }
    }
}

/// Declarative description of one named stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: StageKind,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Real work carried by a stage.
///
/// The stage's progress runs alongside the work but is held below 100 until
/// `run` returns. An error aborts the whole pipeline.
#[async_trait]
pub trait StageTask: Send + Sync {
    async fn run(&self, context: Context) -> anyhow::Result<()>;
}

/// A stage as held by a built pipeline
#[derive(Clone)]
pub struct Stage {
    pub spec: StageSpec,
    pub task: Option<Arc<dyn StageTask>>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("spec", &self.spec)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}
