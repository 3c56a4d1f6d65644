//! Sequential, named-stage pipelines with synthetic progress.
//!
//! A [`Pipeline`] drives its stages strictly one after another. Each stage advances from 0 to
//! 100 in discrete increments (fixed-duration or variable-speed), reporting every increment to
//! a [`ProgressObserver`]. A stage may carry a [`StageTask`] doing real work; its final
//! increment is held back until that work finishes. Runs stop on a [`CancelToken`].

pub mod cancel;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod storage;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use context::Context;
pub use error::{FlowError, Result};
pub use pipeline::{FIXED_STAGE_STEPS, Pipeline, PipelineBuilder, PipelineReport, PipelineTiming};
pub use progress::{NoopObserver, ProgressBoard, ProgressObserver, StageProgress};
pub use runner::FlowRunner;
pub use stage::{Stage, StageKind, StageSpec, StageTask};
pub use storage::{InMemoryRunStorage, RunRecord, RunStatus, RunStorage, RunUpdate};
