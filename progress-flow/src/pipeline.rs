use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    context::Context,
    error::{FlowError, Result},
    progress::{ProgressBoard, ProgressObserver, StageProgress},
    stage::{Stage, StageKind, StageSpec, StageTask},
};

/// Number of increments a fixed-duration stage always reports
pub const FIXED_STAGE_STEPS: u32 = 10;

type WorkFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Clock settings for synthetic progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineTiming {
    /// Total wall-clock length of a fixed-duration stage
    pub fixed_stage_duration: Duration,
    /// Interval between increments of a variable stage running at speed 1
    pub base_tick: Duration,
    /// Increments a variable stage takes to go from 0 to 100
    pub variable_increments: u32,
}

impl PipelineTiming {
    pub fn fixed_tick(&self) -> Duration {
        self.fixed_stage_duration / FIXED_STAGE_STEPS
    }

    /// Saturates at `Duration::MAX`; [`PipelineBuilder::build`] rejects factors that get there
    pub fn variable_tick(&self, speed_factor: f64) -> Duration {
        self.checked_variable_tick(speed_factor).unwrap_or(Duration::MAX)
    }

    /// `None` when the tick, or the whole stage, does not fit in a `Duration`
    pub fn checked_variable_tick(&self, speed_factor: f64) -> Option<Duration> {
        let tick = Duration::try_from_secs_f64(self.base_tick.as_secs_f64() / speed_factor).ok()?;
        tick.checked_mul(self.variable_increments)?;
        Some(tick)
    }

    /// Increment count and interval for a stage of the given kind
    pub fn schedule(&self, kind: &StageKind) -> (u32, Duration) {
        match kind {
            StageKind::FixedDuration => (FIXED_STAGE_STEPS, self.fixed_tick()),
            StageKind::VariableSpeed { speed_factor } => {
                (self.variable_increments, self.variable_tick(*speed_factor))
            }
        }
    }
}

impl Default for PipelineTiming {
    fn default() -> Self {
        Self {
            fixed_stage_duration: Duration::from_secs(1),
            base_tick: Duration::from_millis(50),
            variable_increments: 100,
        }
    }
}

/// Outcome of a pipeline that ran to completion
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub pipeline_id: String,
    pub stages: Vec<StageProgress>,
    pub elapsed: Duration,
}

/// An ordered sequence of named stages driven strictly one after another
pub struct Pipeline {
    pub id: String,
    stages: Vec<Stage>,
    timing: PipelineTiming,
}

impl Pipeline {
    pub fn specs(&self) -> Vec<StageSpec> {
        self.stages.iter().map(|stage| stage.spec.clone()).collect()
    }

    pub fn timing(&self) -> PipelineTiming {
        self.timing
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Drive every stage to 100 in order.
    ///
    /// `observer` sees each increment exactly once. Nothing is reported after
    /// `cancel` fires; the run then ends with [`FlowError::Cancelled`].
    pub async fn run(
        &self,
        context: Context,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<PipelineReport> {
        let started = Instant::now();
        let specs = self.specs();
        let board = ProgressBoard::new(&specs);

        info!(pipeline = %self.id, stages = self.stages.len(), "Starting pipeline");

        for stage in &self.stages {
            if cancel.is_cancelled() {
                return Err(cancelled(&stage.spec.name));
            }
            self.drive_stage(stage, &context, observer, &board, cancel)
                .await?;
        }

        let elapsed = started.elapsed();
        info!(pipeline = %self.id, elapsed_ms = elapsed.as_millis() as u64, "Pipeline completed");

        Ok(PipelineReport {
            pipeline_id: self.id.clone(),
            stages: board.snapshot(),
            elapsed,
        })
    }

    async fn drive_stage(
        &self,
        stage: &Stage,
        context: &Context,
        observer: &dyn ProgressObserver,
        board: &ProgressBoard,
        cancel: &CancelToken,
    ) -> Result<()> {
        let name = stage.spec.name.as_str();
        let (steps, tick) = self.timing.schedule(&stage.spec.kind);
        debug!(stage = name, steps, tick_ms = tick.as_millis() as u64, "Driving stage");

        let mut work: Option<WorkFuture<'_>> =
            stage.task.as_ref().map(|task| task.run(context.clone()));

        let mut step = 0;
        while step < steps {
            if step + 1 == steps && work.is_some() {
                debug!(stage = name, "Holding final increment until stage work completes");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(name)),
                    outcome = wait_for_work(&mut work) => {
                        work = None;
                        settle(name, outcome)?;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(name)),
                outcome = wait_for_work(&mut work), if work.is_some() => {
                    work = None;
                    settle(name, outcome)?;
                    continue;
                }
                _ = sleep(tick) => {}
            }

            if cancel.is_cancelled() {
                return Err(cancelled(name));
            }

            step += 1;
            let progress = if step == steps {
                100.0
            } else {
                100.0 * f64::from(step) / f64::from(steps)
            };
            board.record(name, progress);
            observer.on_progress(name, progress);
        }

        info!(stage = name, "Stage completed");
        Ok(())
    }
}

async fn wait_for_work(work: &mut Option<WorkFuture<'_>>) -> anyhow::Result<()> {
    match work.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

fn settle(stage: &str, outcome: anyhow::Result<()>) -> Result<()> {
    outcome.map_err(|source| {
        warn!(stage, error = %source, "Stage work failed, aborting pipeline");
        FlowError::StageFailed {
            stage: stage.to_string(),
            source,
        }
    })
}

fn cancelled(stage: &str) -> FlowError {
    info!(stage, "Pipeline cancelled");
    FlowError::Cancelled {
        stage: stage.to_string(),
    }
}

/// Builder for creating pipelines
pub struct PipelineBuilder {
    id: String,
    stages: Vec<Stage>,
    timing: PipelineTiming,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stages: Vec::new(),
            timing: PipelineTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: PipelineTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Add a purely synthetic stage
    pub fn add_stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(Stage { spec, task: None });
        self
    }

    /// Add a stage whose final increment waits on `task`
    pub fn add_task_stage(mut self, spec: StageSpec, task: Arc<dyn StageTask>) -> Self {
        self.stages.push(Stage {
            spec,
            task: Some(task),
        });
        self
    }

    /// Attach `task` to an already added stage
    pub fn attach_task(mut self, stage_name: &str, task: Arc<dyn StageTask>) -> Result<Self> {
        let stage = self
            .stages
            .iter_mut()
            .find(|stage| stage.spec.name == stage_name)
            .ok_or_else(|| FlowError::InvalidStage(format!("no stage named '{}'", stage_name)))?;
        stage.task = Some(task);
        Ok(self)
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.timing.variable_increments == 0 {
            return Err(FlowError::InvalidStage(
                "variable stages need at least one increment".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            let spec = &stage.spec;
            if spec.name.trim().is_empty() {
                return Err(FlowError::InvalidStage("stage name is empty".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(FlowError::DuplicateStage(spec.name.clone()));
            }
            if let Some(speed) = spec.kind.speed_factor() {
                if !speed.is_finite() || speed <= 0.0 {
                    return Err(FlowError::InvalidStage(format!(
                        "stage '{}' has speed factor {}, expected a positive number",
                        spec.name, speed
                    )));
                }
                if self.timing.checked_variable_tick(speed).is_none() {
                    return Err(FlowError::InvalidStage(format!(
                        "stage '{}' has speed factor {}, too slow for the configured tick",
                        spec.name, speed
                    )));
                }
            }
        }

        Ok(Pipeline {
            id: self.id,
            stages: self.stages,
            timing: self.timing,
        })
    }
}
