pub mod assist;
pub mod generation;
pub mod utils;

pub use assist::{generate_mesh_query, suggest_theme};
pub use generation::{GenerationStageTask, INTRODUCTION_KEY};
pub use utils::{GenerationPrompt, RigGenerator, TextGenerator};
