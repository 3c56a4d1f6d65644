use async_trait::async_trait;
use progress_flow::{Context, StageTask};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Context key holding the generated introduction
pub const INTRODUCTION_KEY: &str = "introduction";

/// Waits for a generation call started before the pipeline and publishes its text.
///
/// The call is single-shot: running the stage a second time fails.
pub struct GenerationStageTask {
    handle: Mutex<Option<JoinHandle<anyhow::Result<String>>>>,
}

impl GenerationStageTask {
    pub fn new(handle: JoinHandle<anyhow::Result<String>>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait]
impl StageTask for GenerationStageTask {
    async fn run(&self, context: Context) -> anyhow::Result<()> {
        let handle = self
            .handle
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("generation result was already consumed"))?;

        let text = handle
            .await
            .map_err(|e| anyhow::anyhow!("generation task did not finish: {}", e))??;

        info!(chars = text.len(), "Generated introduction");
        context.set(INTRODUCTION_KEY, text).await?;
        Ok(())
    }
}
