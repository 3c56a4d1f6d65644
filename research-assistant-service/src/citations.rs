//! Splits generated prose into plain text and `[ID…]` citation markers resolved against the
//! documents the prose was generated from.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::Document;

pub const UNKNOWN_SOURCE: &str = "Unknown source";

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ID([0-9A-Za-z_]+)\]").expect("Invalid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CitationSegment {
    Text {
        content: String,
    },
    Citation {
        /// The marker exactly as it appeared, brackets included
        content: String,
        source_id: String,
        resolved_source_title: String,
    },
}

impl CitationSegment {
    pub fn content(&self) -> &str {
        match self {
            CitationSegment::Text { content } | CitationSegment::Citation { content, .. } => content,
        }
    }

    pub fn is_citation(&self) -> bool {
        matches!(self, CitationSegment::Citation { .. })
    }
}

/// Split `generated_text` at citation markers.
///
/// Concatenating the segment contents yields `generated_text` unchanged. Markers whose id
/// matches no document resolve to [`UNKNOWN_SOURCE`].
pub fn annotate(generated_text: &str, documents: &[Document]) -> Vec<CitationSegment> {
    let titles: HashMap<&str, &str> = documents
        .iter()
        .map(|document| (document.id.as_str(), document.title.as_str()))
        .collect();

    let mut segments = Vec::new();
    let mut cursor = 0;

    for captures in CITATION_MARKER.captures_iter(generated_text) {
        let (Some(marker), Some(id)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        if marker.start() > cursor {
            segments.push(CitationSegment::Text {
                content: generated_text[cursor..marker.start()].to_string(),
            });
        }

        let source_id = id.as_str();
        segments.push(CitationSegment::Citation {
            content: marker.as_str().to_string(),
            source_id: source_id.to_string(),
            resolved_source_title: titles
                .get(source_id)
                .copied()
                .unwrap_or(UNKNOWN_SOURCE)
                .to_string(),
        });
        cursor = marker.end();
    }

    if cursor < generated_text.len() {
        segments.push(CitationSegment::Text {
            content: generated_text[cursor..].to_string(),
        });
    }

    segments
}

/// Distinct ids cited in `segments`, in order of first appearance
pub fn cited_ids(segments: &[CitationSegment]) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for segment in segments {
        if let CitationSegment::Citation { source_id, .. } = segment {
            if !ids.contains(&source_id.as_str()) {
                ids.push(source_id);
            }
        }
    }
    ids
}
