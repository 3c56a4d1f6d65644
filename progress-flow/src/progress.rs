use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::stage::StageSpec;

/// Receives every progress increment emitted by a running pipeline
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, stage: &str, progress: f64);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, f64) + Send + Sync,
{
    fn on_progress(&self, stage: &str, progress: f64) {
        self(stage, progress)
    }
}

/// Observer that drops every update
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _stage: &str, _progress: f64) {}
}

/// Snapshot of one stage as shown to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub name: String,
    pub description: String,
    pub progress: f64,
    pub fixed_duration: bool,
    pub speed_factor: Option<f64>,
}

impl StageProgress {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }
}

/// Live, shareable progress view over every stage of a run.
///
/// Updates that would move a stage backwards are ignored, so readers always see
/// non-decreasing values.
#[derive(Clone, Debug)]
pub struct ProgressBoard {
    order: Arc<Vec<String>>,
    stages: Arc<DashMap<String, StageProgress>>,
}

impl ProgressBoard {
    pub fn new(specs: &[StageSpec]) -> Self {
        let stages = DashMap::new();
        for spec in specs {
            stages.insert(
                spec.name.clone(),
                StageProgress {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    progress: 0.0,
                    fixed_duration: spec.kind.is_fixed_duration(),
                    speed_factor: spec.kind.speed_factor(),
                },
            );
        }
        Self {
            order: Arc::new(specs.iter().map(|s| s.name.clone()).collect()),
            stages: Arc::new(stages),
        }
    }

    /// Records a value; returns `false` for unknown stages or regressions
    pub fn record(&self, stage: &str, progress: f64) -> bool {
        match self.stages.get_mut(stage) {
            Some(mut entry) if progress >= entry.progress => {
                entry.progress = progress.min(100.0);
                true
            }
            _ => false,
        }
    }

    pub fn progress_of(&self, stage: &str) -> Option<f64> {
        self.stages.get(stage).map(|entry| entry.progress)
    }

    /// Stages in pipeline order
    pub fn snapshot(&self) -> Vec<StageProgress> {
        self.order
            .iter()
            .filter_map(|name| self.stages.get(name).map(|entry| entry.clone()))
            .collect()
    }

    /// Mean progress across all stages
    pub fn overall(&self) -> f64 {
        if self.order.is_empty() {
            return 100.0;
        }
        let total: f64 = self.stages.iter().map(|entry| entry.progress).sum();
        total / self.order.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|entry| entry.is_complete())
    }
}

impl ProgressObserver for ProgressBoard {
    fn on_progress(&self, stage: &str, progress: f64) {
        self.record(stage, progress);
    }
}
