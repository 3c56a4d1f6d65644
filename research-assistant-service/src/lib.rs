pub mod citations;
pub mod config;
pub mod error;
pub mod export;
pub mod mesh;
pub mod models;
pub mod orchestrator;
pub mod pubmed;
pub mod saved;
pub mod service;
pub mod tasks;
pub mod themes;
pub mod workflow;

pub use citations::{CitationSegment, UNKNOWN_SOURCE, annotate};
pub use config::AppConfig;
pub use error::{AssistantError, Result};
pub use mesh::{Combination, MeshCombinationEngine, Term, generate_combinations};
pub use models::*;
pub use orchestrator::ThemeExtractionOrchestrator;
pub use service::{AppState, build_router, create_app};
pub use themes::Theme;
pub use workflow::{build_introduction_pipeline, introduction_stages};
