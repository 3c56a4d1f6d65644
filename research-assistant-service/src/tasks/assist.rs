use tracing::info;

use super::utils::{GenerationPrompt, TextGenerator};
use crate::error::{AssistantError, Result};

const MESH_QUERY_INSTRUCTION: &str = "You are a helpful assistant that converts user queries into MeSH (Medical Subject Headings) search queries for PubMed. Only return the MeSH query, nothing else.";

const THEME_INSTRUCTION: &str = "You are a helpful assistant that generates additional research themes based on existing themes. Generate a single, concise theme that is related to but distinct from the existing themes.";

fn generation_failed(stage: &str, source: anyhow::Error) -> AssistantError {
    AssistantError::GenerationFailed {
        stage: stage.to_string(),
        source,
    }
}

/// Turn a casual search term into a MeSH query
pub async fn generate_mesh_query(generator: &dyn TextGenerator, search_term: &str) -> Result<String> {
    let search_term = search_term.trim();
    if search_term.is_empty() {
        return Err(AssistantError::InvalidArgument(
            "search term is empty".to_string(),
        ));
    }

    let prompt = GenerationPrompt::new(
        MESH_QUERY_INSTRUCTION,
        format!("Convert this search term to a MeSH query: {}", search_term),
    );
    let query = generator
        .generate(&prompt)
        .await
        .map_err(|e| generation_failed("mesh_query", e))?;

    info!(search_term, "Generated MeSH query");
    Ok(query.trim().to_string())
}

/// Propose one research theme related to `existing`
pub async fn suggest_theme(generator: &dyn TextGenerator, existing: &[String]) -> Result<String> {
    let prompt = GenerationPrompt::new(
        THEME_INSTRUCTION,
        format!(
            "Based on these existing themes: {}, suggest a new, related research theme.",
            existing.join(", ")
        ),
    );
    let theme = generator
        .generate(&prompt)
        .await
        .map_err(|e| generation_failed("theme_suggestion", e))?;

    info!(existing = existing.len(), "Suggested research theme");
    Ok(theme.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingGenerator {
        reply: String,
        prompts: Mutex<Vec<GenerationPrompt>>,
    }

    impl RecordingGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn generate(&self, prompt: &GenerationPrompt) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok(self.reply.clone())
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl TextGenerator for DownGenerator {
        async fn generate(&self, _prompt: &GenerationPrompt) -> anyhow::Result<String> {
            anyhow::bail!("upstream unavailable")
        }
    }

    #[tokio::test]
    async fn mesh_query_is_trimmed() {
        let generator = RecordingGenerator::new("  \"Heart Attack\"[MeSH]\n");
        let query = generate_mesh_query(&generator, " heart attack ").await.unwrap();
        assert_eq!(query, "\"Heart Attack\"[MeSH]");

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.ends_with("MeSH query: heart attack"));
    }

    #[tokio::test]
    async fn blank_search_term_is_rejected() {
        let generator = RecordingGenerator::new("unused");
        let result = generate_mesh_query(&generator, "   ").await;
        assert!(matches!(result, Err(AssistantError::InvalidArgument(_))));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn theme_prompt_lists_existing_themes() {
        let generator = RecordingGenerator::new("Antibiotic timing");
        let existing = vec!["Sepsis".to_string(), "Lactate".to_string()];
        assert_eq!(suggest_theme(&generator, &existing).await.unwrap(), "Antibiotic timing");
        assert!(generator.prompts.lock().unwrap()[0].user.contains("Sepsis, Lactate"));
    }

    #[tokio::test]
    async fn generator_failure_is_reported() {
        let result = suggest_theme(&DownGenerator, &[]).await;
        assert!(matches!(result, Err(AssistantError::GenerationFailed { .. })));
    }
}
