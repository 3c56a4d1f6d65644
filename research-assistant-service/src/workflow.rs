use progress_flow::{Pipeline, PipelineBuilder, PipelineTiming, StageKind, StageSpec, StageTask};
use std::sync::Arc;

use crate::error::Result;

/// Stage whose final increment waits on the generation call
pub const DRAFT_GENERATION_STAGE: &str = "Draft Generation";

/// The seven stages shown while an introduction is drafted
pub fn introduction_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("Hybrid Retrieval-Generation Models", StageKind::variable(1.5))
            .with_description(
                "Retrieving relevant information from PDFs and generating initial content.",
            ),
        StageSpec::new("Knowledge-Enhanced Text Generation", StageKind::variable(1.2))
            .with_description(
                "Using extracted knowledge to generate factually accurate text with in-line citations.",
            ),
        StageSpec::new("Memory-Augmented Neural Networks (MANNs)", StageKind::variable(1.0))
            .with_description(
                "Storing and accessing information from multiple PDFs to effectively combine information from different sources.",
            ),
        StageSpec::new("Attention Mechanisms", StageKind::variable(1.5)).with_description(
            "Focusing on the most relevant parts of the text within PDFs to identify key points and determine citation placement.",
        ),
        StageSpec::new("Content Extraction", StageKind::FixedDuration).with_description(
            "Extracting key concepts, quotes, and summaries from the retrieved information.",
        ),
        StageSpec::new(DRAFT_GENERATION_STAGE, StageKind::variable(1.0))
            .with_description("Generating the introduction draft using the extracted content."),
        StageSpec::new("Final Refinement", StageKind::FixedDuration)
            .with_description("Refining and polishing the generated draft for coherence and clarity."),
    ]
}

/// Pipeline over [`introduction_stages`] with `generation` attached to the draft stage
pub fn build_introduction_pipeline(
    id: impl Into<String>,
    timing: PipelineTiming,
    generation: Arc<dyn StageTask>,
) -> Result<Pipeline> {
    let pipeline = introduction_stages()
        .into_iter()
        .fold(PipelineBuilder::new(id).with_timing(timing), |builder, spec| {
            builder.add_stage(spec)
        })
        .attach_task(DRAFT_GENERATION_STAGE, generation)?
        .build()?;
    Ok(pipeline)
}
