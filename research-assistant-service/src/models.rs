use serde::{Deserialize, Serialize};

use crate::themes::Theme;

pub const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// A saved search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// PubMed id; the canonical identifier used by citation markers
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub external_ref: String,
    #[serde(default)]
    pub journal: Option<String>,
    /// Full text when available, usually empty
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub article_type: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            external_ref: pubmed_url(&id),
            id,
            title: title.into(),
            authors: Vec::new(),
            abstract_text: String::new(),
            year: None,
            journal: None,
            content: String::new(),
            language: None,
            article_type: None,
        }
    }
}

pub fn pubmed_url(id: &str) -> String {
    format!("{}/{}/", PUBMED_ARTICLE_URL, id)
}

/// One row of a PubMed result list, before it is saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub uid: String,
    pub title: String,
    pub authors: Vec<String>,
    pub pubdate: String,
    pub journal: Option<String>,
    pub language: Option<String>,
    pub article_type: Option<String>,
}

impl SearchSummary {
    pub fn into_document(self, abstract_text: Option<String>) -> Document {
        let year = parse_year(&self.pubdate);
        Document {
            external_ref: pubmed_url(&self.uid),
            id: self.uid,
            title: self.title,
            authors: self.authors,
            abstract_text: abstract_text.unwrap_or_default(),
            year,
            journal: self.journal,
            content: String::new(),
            language: self.language,
            article_type: self.article_type,
        }
    }
}

/// First four-digit run in a PubMed date such as `2021 Mar 4`
pub fn parse_year(pubdate: &str) -> Option<i32> {
    pubdate
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 4)
        .and_then(|part| part.parse().ok())
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub year: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MeshParams {
    pub query: String,
    pub max_combinations: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeshQueryRequest {
    pub search_term: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResultsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThemeSuggestionRequest {
    pub themes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntroductionRequest {
    #[serde(default)]
    pub themes: Vec<Theme>,
    /// Free text, one theme per line
    #[serde(default)]
    pub themes_text: Option<String>,
}
