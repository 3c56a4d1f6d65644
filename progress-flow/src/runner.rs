//! FlowRunner: starts a pipeline-backed job in the background, records its outcome in a
//! [`RunStorage`], and lets callers poll or cancel it by id.
//!
//! The job receives the run's [`ProgressBoard`] (to report into) and [`CancelToken`] (to stop
//! on). A job that ignores the token may still complete after the run was cancelled; that
//! late output is dropped and the run stays `Cancelled`. Settled runs are evicted once the
//! retention period has passed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    cancel::CancelToken,
    error::{FlowError, Result},
    progress::ProgressBoard,
    stage::StageSpec,
    storage::{RunRecord, RunStatus, RunStorage},
};

/// How long a finished run stays readable before it is evicted
pub const DEFAULT_RUN_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct FlowRunner {
    storage: Arc<dyn RunStorage>,
    retention: Duration,
}

impl FlowRunner {
    pub fn new(storage: Arc<dyn RunStorage>) -> Self {
        Self {
            storage,
            retention: DEFAULT_RUN_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a run for `specs`, spawn `job`, and return the run id immediately.
    ///
    /// Once the job settles the run is kept for the retention period, then deleted.
    pub async fn start<F, Fut>(&self, specs: &[StageSpec], job: F) -> Result<String>
    where
        F: FnOnce(ProgressBoard, CancelToken) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let run = RunRecord::new(specs);
        let run_id = run.id.clone();
        let board = run.board.clone();
        let cancel = run.cancel.clone();
        self.storage.save(run).await?;

        let job = job(board, cancel.clone());
        let storage = self.storage.clone();
        let retention = self.retention;
        let id = run_id.clone();

        tokio::spawn(async move {
            let outcome = job.await;
            let status = if cancel.is_cancelled() {
                debug!(run_id = %id, "Discarding result of cancelled run");
                RunStatus::Cancelled
            } else {
                match outcome {
                    Ok(output) => RunStatus::Completed { output },
                    Err(e) => RunStatus::Failed {
                        error: format!("{:#}", e),
                    },
                }
            };
            record_outcome(storage.as_ref(), &id, status).await;

            tokio::time::sleep(retention).await;
            match storage.delete(&id).await {
                Ok(()) => debug!(run_id = %id, "Evicted finished run"),
                Err(e) => error!(run_id = %id, "Failed to evict run: {}", e),
            }
        });

        info!(run_id = %run_id, "Run started");
        Ok(run_id)
    }

    pub async fn status(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.storage.get(run_id).await
    }

    /// Signal cancellation and mark the run cancelled unless it already finished
    pub async fn cancel(&self, run_id: &str) -> Result<RunRecord> {
        let run = self
            .storage
            .update(
                run_id,
                Box::new(|run: &mut RunRecord| {
                    if !run.status.is_finished() {
                        run.cancel.cancel();
                        run.finish(RunStatus::Cancelled);
                        info!(run_id = %run.id, "Run cancelled");
                    }
                }),
            )
            .await?
            .ok_or_else(|| FlowError::RunNotFound(run_id.to_string()))?;
        Ok(run)
    }

    /// Cancel the run if needed and forget it
    pub async fn discard(&self, run_id: &str) -> Result<()> {
        if let Some(run) = self.storage.get(run_id).await? {
            run.cancel.cancel();
        }
        self.storage.delete(run_id).await
    }
}

/// Settle a run with `status` unless it was already settled or cancelled in the meantime
async fn record_outcome(storage: &dyn RunStorage, run_id: &str, status: RunStatus) {
    let applied = storage
        .update(
            run_id,
            Box::new(move |run: &mut RunRecord| {
                if run.status.is_finished()
                    || (run.cancel.is_cancelled() && status != RunStatus::Cancelled)
                {
                    debug!(run_id = %run.id, "Run already settled, ignoring outcome");
                    return;
                }
                run.finish(status);
            }),
        )
        .await;

    match applied {
        Ok(Some(_)) => {}
        Ok(None) => debug!(run_id, "Run was discarded before it finished"),
        Err(e) => error!(run_id, "Failed to save run outcome: {}", e),
    }
}
