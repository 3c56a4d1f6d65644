//! Drafting an introduction from the saved set: one generation call driven
//! alongside the synthetic progress pipeline.

use progress_flow::{CancelToken, Context, FlowError, NoopObserver, PipelineTiming, ProgressObserver, StageSpec};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::config::DEFAULT_PROMPT_TOKEN_BUDGET;
use crate::error::{AssistantError, Result};
use crate::models::Document;
use crate::tasks::generation::{GenerationStageTask, INTRODUCTION_KEY};
use crate::tasks::utils::{GenerationPrompt, TextGenerator};
use crate::themes::{Theme, validate_themes};
use crate::workflow::{DRAFT_GENERATION_STAGE, build_introduction_pipeline, introduction_stages};

const SYSTEM_INSTRUCTION: &str = "You are an expert academic writer. Your task is to write a comprehensive introduction for a research paper, grounded in the provided source documents and shaped by the provided research themes. Every claim taken from a source must carry an in-line citation in the exact form [ID<document id>], for example [ID12345678].";

const WRITING_GUIDELINES: &str = "Create an introduction that:
1. Provides context for the research topic and how it fits into the broader field.
2. Highlights the key themes and their significance, giving more weight to themes with higher importance.
3. Identifies specific gaps in current knowledge or areas of controversy, referencing the provided content.
4. Presents a clear, focused research question or objective that addresses these gaps.
5. Outlines the structure of the paper.
6. Includes precise in-line citations in the format [ID<document id>] whenever information from the processed content is used.

The introduction should be academically rigorous, well-structured and approximately 750-1000 words long.";

/// Aborts the spawned generation call when orchestration ends, however it ends
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The part of a [`Document`] the generation prompt sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentProjection {
    pub id: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Title followed by any full text
    pub content: String,
}

impl From<&Document> for DocumentProjection {
    fn from(document: &Document) -> Self {
        let content = if document.content.is_empty() {
            document.title.clone()
        } else {
            format!("{}\n{}", document.title, document.content)
        };
        Self {
            id: document.id.clone(),
            abstract_text: document.abstract_text.clone(),
            content,
        }
    }
}

/// Prompt for drafting an introduction; identical inputs give an identical prompt
pub fn build_prompt(documents: &[Document], themes: &[Theme]) -> GenerationPrompt {
    let content_summary = documents
        .iter()
        .map(DocumentProjection::from)
        .map(|p| format!("ID: {}\nAbstract: {}\nContent: {}", p.id, p.abstract_text, p.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let theme_summary = if themes.is_empty() {
        "No themes provided.".to_string()
    } else {
        themes
            .iter()
            .map(|theme| format!("Theme: {}, Importance: {}", theme.text, theme.importance))
            .collect::<Vec<_>>()
            .join("\n")
    };

    GenerationPrompt::new(
        SYSTEM_INSTRUCTION,
        format!(
            "Based on the following processed content and themes, generate an introduction for a research paper.\n\n\
             Processed Content:\n\n{}\n\nThemes and their importance:\n{}\n\n{}",
            content_summary, theme_summary, WRITING_GUIDELINES
        ),
    )
}

pub struct ThemeExtractionOrchestrator {
    generator: Arc<dyn TextGenerator>,
    timing: PipelineTiming,
    prompt_token_budget: usize,
}

impl ThemeExtractionOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, timing: PipelineTiming) -> Self {
        Self {
            generator,
            timing,
            prompt_token_budget: DEFAULT_PROMPT_TOKEN_BUDGET,
        }
    }

    pub fn with_prompt_token_budget(mut self, budget: usize) -> Self {
        self.prompt_token_budget = budget;
        self
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub fn stages(&self) -> Vec<StageSpec> {
        introduction_stages()
    }

    pub async fn extract_and_generate(&self, documents: &[Document], themes: &[Theme]) -> Result<String> {
        self.extract_and_generate_with(documents, themes, &NoopObserver, &CancelToken::new())
            .await
    }

    /// Generate an introduction while driving the progress stages.
    ///
    /// The generator is called exactly once and its text is returned untouched. On
    /// cancellation the in-flight call is aborted and its result never surfaces.
    pub async fn extract_and_generate_with(
        &self,
        documents: &[Document],
        themes: &[Theme],
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<String> {
        if documents.is_empty() {
            return Err(AssistantError::EmptyInput);
        }
        validate_themes(themes)?;

        let prompt = build_prompt(documents, themes);
        let estimated_tokens = prompt.estimated_tokens();
        if estimated_tokens > self.prompt_token_budget {
            return Err(AssistantError::PromptTooLarge {
                estimated_tokens,
                limit: self.prompt_token_budget,
            });
        }
        if cancel.is_cancelled() {
            return Err(AssistantError::Cancelled);
        }

        info!(
            documents = documents.len(),
            themes = themes.len(),
            estimated_tokens,
            "Starting introduction generation"
        );

        let generator = self.generator.clone();
        let handle = tokio::spawn(async move { generator.generate(&prompt).await });
        let _abort = AbortOnDrop(handle.abort_handle());

        let pipeline = build_introduction_pipeline(
            format!("introduction-{}", uuid::Uuid::new_v4()),
            self.timing,
            Arc::new(GenerationStageTask::new(handle)),
        )?;

        let context = Context::new();
        match pipeline.run(context.clone(), observer, cancel).await {
            Ok(report) => {
                info!(elapsed_ms = report.elapsed.as_millis() as u64, "Introduction generated");
                context
                    .get::<String>(INTRODUCTION_KEY)
                    .await
                    .ok_or_else(|| AssistantError::GenerationFailed {
                        stage: DRAFT_GENERATION_STAGE.to_string(),
                        source: anyhow::anyhow!("no introduction was produced"),
                    })
            }
            Err(FlowError::StageFailed { stage, source }) => {
                warn!(stage = %stage, "Introduction generation failed: {:#}", source);
                Err(AssistantError::GenerationFailed { stage, source })
            }
            Err(FlowError::Cancelled { stage }) => {
                info!(stage = %stage, "Introduction generation cancelled");
                Err(AssistantError::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticGenerator {
        reply: String,
        delay: Duration,
        calls: AtomicUsize,
        finished: Arc<AtomicBool>,
        prompts: Mutex<Vec<GenerationPrompt>>,
    }

    impl StaticGenerator {
        fn new(reply: &str, delay: Duration) -> Self {
            Self {
                reply: reply.to_string(),
                delay,
                calls: AtomicUsize::new(0),
                finished: Arc::new(AtomicBool::new(false)),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StaticGenerator {
        async fn generate(&self, prompt: &GenerationPrompt) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &GenerationPrompt) -> anyhow::Result<String> {
            anyhow::bail!("HTTP 503 from completion API")
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Never answers; flags when its in-flight call is dropped
    #[derive(Default)]
    struct HangingGenerator {
        started: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TextGenerator for HangingGenerator {
        async fn generate(&self, _prompt: &GenerationPrompt) -> anyhow::Result<String> {
            let _flag = DropFlag(self.dropped.clone());
            self.started.store(true, Ordering::SeqCst);
            std::future::pending::<anyhow::Result<String>>().await
        }
    }

    fn timing() -> PipelineTiming {
        PipelineTiming {
            fixed_stage_duration: Duration::from_millis(100),
            base_tick: Duration::from_millis(5),
            variable_increments: 10,
        }
    }

    fn documents() -> Vec<Document> {
        let mut first = Document::new("31452104", "Lactate in sepsis");
        first.abstract_text = "Serum lactate predicts mortality.".to_string();
        let second = Document::new("29871234", "Fluid therapy");
        vec![first, second]
    }

    fn themes() -> Vec<Theme> {
        vec![
            Theme::new("Early biomarkers", 9).unwrap(),
            Theme::new("Paediatric outcomes", 4).unwrap(),
        ]
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, f64)>>,
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, stage: &str, progress: f64) {
            self.events.lock().unwrap().push((stage.to_string(), progress));
        }
    }

    #[tokio::test]
    async fn empty_documents_fail_before_generation() {
        let generator = Arc::new(StaticGenerator::new("unused", Duration::ZERO));
        let orchestrator = ThemeExtractionOrchestrator::new(generator.clone(), timing());

        let result = orchestrator.extract_and_generate(&[], &themes()).await;
        assert!(matches!(result, Err(AssistantError::EmptyInput)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_raw_text_after_all_stages_complete() {
        let raw = "  Sepsis remains deadly [ID31452104].\n\nUnknown [ID1] too.  ";
        let generator = Arc::new(StaticGenerator::new(raw, Duration::from_millis(30)));
        let orchestrator = ThemeExtractionOrchestrator::new(generator.clone(), timing());
        let recorder = Recorder::default();

        let text = orchestrator
            .extract_and_generate_with(&documents(), &themes(), &recorder, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(text, raw);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let events = recorder.events.lock().unwrap();
        for stage in introduction_stages() {
            let last = events
                .iter()
                .filter(|(name, _)| *name == stage.name)
                .map(|(_, p)| *p)
                .last();
            assert_eq!(last, Some(100.0), "stage {}", stage.name);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn draft_stage_waits_for_slow_generation() {
        let generator = Arc::new(StaticGenerator::new("Done.", Duration::from_secs(30)));
        let finished = generator.finished.clone();
        let orchestrator = ThemeExtractionOrchestrator::new(generator, timing());

        let completed_early = Arc::new(AtomicBool::new(false));
        let flag = completed_early.clone();
        let observer = move |stage: &str, progress: f64| {
            if stage == DRAFT_GENERATION_STAGE && progress >= 100.0 && !finished.load(Ordering::SeqCst) {
                flag.store(true, Ordering::SeqCst);
            }
        };

        let text = orchestrator
            .extract_and_generate_with(&documents(), &[], &observer, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(text, "Done.");
        assert!(!completed_early.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn generation_failure_names_the_stage() {
        let orchestrator = ThemeExtractionOrchestrator::new(Arc::new(FailingGenerator), timing());
        let err = orchestrator
            .extract_and_generate(&documents(), &themes())
            .await
            .unwrap_err();

        match err {
            AssistantError::GenerationFailed { stage, source } => {
                assert_eq!(stage, DRAFT_GENERATION_STAGE);
                assert!(source.to_string().contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_progress() {
        let generator = Arc::new(StaticGenerator::new("late", Duration::from_secs(3600)));
        let orchestrator = ThemeExtractionOrchestrator::new(generator, timing());
        let recorder = Recorder::default();
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let result = orchestrator
            .extract_and_generate_with(&documents(), &themes(), &recorder, &cancel)
            .await;
        assert!(matches!(result, Err(AssistantError::Cancelled)));

        let seen = recorder.events.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), seen);
        assert!(!events.iter().any(|(name, _)| name == "Final Refinement"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_orchestration_aborts_the_generation_call() {
        let generator = Arc::new(HangingGenerator::default());
        let started = generator.started.clone();
        let dropped = generator.dropped.clone();
        let orchestrator = ThemeExtractionOrchestrator::new(generator, timing());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.extract_and_generate(&documents(), &themes()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(started.load(Ordering::SeqCst));

        for _ in 0..10 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected() {
        let generator = Arc::new(StaticGenerator::new("unused", Duration::ZERO));
        let orchestrator =
            ThemeExtractionOrchestrator::new(generator.clone(), timing()).with_prompt_token_budget(10);

        let result = orchestrator.extract_and_generate(&documents(), &themes()).await;
        assert!(matches!(
            result,
            Err(AssistantError::PromptTooLarge { limit: 10, .. })
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prompt_embeds_documents_and_themes() {
        let prompt = build_prompt(&documents(), &themes());
        assert_eq!(prompt, build_prompt(&documents(), &themes()));
        assert!(prompt.system.contains("[ID12345678]"));
        assert!(prompt.user.contains(
            "ID: 31452104\nAbstract: Serum lactate predicts mortality.\nContent: Lactate in sepsis"
        ));
        assert!(prompt.user.contains("ID: 29871234\nAbstract: \nContent: Fluid therapy"));
        assert!(prompt.user.contains("Theme: Early biomarkers, Importance: 9\nTheme: Paediatric outcomes, Importance: 4"));
    }

    #[test]
    fn projection_joins_title_and_content() {
        let mut document = Document::new("1", "Title");
        document.content = "Body text".to_string();
        let projection = DocumentProjection::from(&document);
        assert_eq!(projection.content, "Title\nBody text");
    }
}
