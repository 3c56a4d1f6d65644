use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cancel::CancelToken,
    error::Result,
    progress::{ProgressBoard, StageProgress},
    stage::StageSpec,
};

/// Where a run currently stands
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed { output: Value },
    Failed { error: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Bookkeeping for one background pipeline run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    pub board: ProgressBoard,
    pub cancel: CancelToken,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(specs: &[StageSpec]) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: RunStatus::Running,
            board: ProgressBoard::new(specs),
            cancel: CancelToken::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn progress(&self) -> Vec<StageProgress> {
        self.board.snapshot()
    }
}

/// In-place edit applied to a stored run while no other writer can touch it
pub type RunUpdate = Box<dyn FnOnce(&mut RunRecord) + Send>;

/// Trait for storing and retrieving runs
#[async_trait]
pub trait RunStorage: Send + Sync {
    async fn save(&self, run: RunRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<RunRecord>>;
    /// Apply `update` atomically and return the stored result, or `None` for an unknown id
    async fn update(&self, id: &str, update: RunUpdate) -> Result<Option<RunRecord>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of RunStorage
pub struct InMemoryRunStorage {
    runs: Arc<DashMap<String, RunRecord>>,
}

impl InMemoryRunStorage {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl Default for InMemoryRunStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStorage for InMemoryRunStorage {
    async fn save(&self, run: RunRecord) -> Result<()> {
        self.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.get(id).map(|entry| entry.clone()))
    }

    async fn update(&self, id: &str, update: RunUpdate) -> Result<Option<RunRecord>> {
        Ok(self.runs.get_mut(id).map(|mut entry| {
            update(entry.value_mut());
            entry.value().clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.runs.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    #[tokio::test]
    async fn saves_and_deletes_runs() {
        let storage = InMemoryRunStorage::new();
        let run = RunRecord::new(&[StageSpec::new("draft", StageKind::FixedDuration)]);
        let id = run.id.clone();

        storage.save(run).await.unwrap();
        let loaded = storage.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.progress().len(), 1);

        storage.delete(&id).await.unwrap();
        assert!(storage.get(&id).await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn updates_apply_in_place() {
        let storage = InMemoryRunStorage::new();
        let run = RunRecord::new(&[]);
        let id = run.id.clone();
        storage.save(run).await.unwrap();

        let updated = storage
            .update(
                &id,
                Box::new(|run: &mut RunRecord| run.finish(RunStatus::Cancelled)),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, RunStatus::Cancelled);
        assert_eq!(
            storage.get(&id).await.unwrap().unwrap().status,
            RunStatus::Cancelled
        );

        let missing = storage
            .update(
                "missing",
                Box::new(|run: &mut RunRecord| run.finish(RunStatus::Cancelled)),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn finishing_stamps_the_record() {
        let mut run = RunRecord::new(&[]);
        run.finish(RunStatus::Failed {
            error: "boom".to_string(),
        });
        assert!(run.status.is_finished());
        assert!(run.finished_at.is_some());
    }
}
