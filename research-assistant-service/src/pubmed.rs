//! PubMed E-utilities client: literature search, saved-document details and MeSH lookup.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mesh::Term;
use crate::models::{Document, SearchSummary};

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_MAX_RESULTS: usize = 20;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs literature queries and resolves saved ids to full documents
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchSummary>>;
    async fn fetch_documents(&self, ids: &[String]) -> anyhow::Result<Vec<Document>>;
}

/// Maps free text to candidate MeSH headings
#[async_trait]
pub trait MeshVocabulary: Send + Sync {
    async fn lookup_terms(&self, text: &str) -> anyhow::Result<Vec<Term>>;
}

/// Year and author filters applied to a result list
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub year: Option<String>,
    pub author: Option<String>,
}

impl SearchFilter {
    pub fn new(year: Option<String>, author: Option<String>) -> Self {
        let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            year: non_blank(year),
            author: non_blank(author),
        }
    }

    pub fn matches(&self, summary: &SearchSummary) -> bool {
        let year_match = self
            .year
            .as_deref()
            .is_none_or(|year| summary.pubdate.contains(year.trim()));
        let author_match = self.author.as_deref().is_none_or(|author| {
            let needle = author.trim().to_lowercase();
            summary
                .authors
                .iter()
                .any(|name| name.to_lowercase().contains(&needle))
        });
        year_match && author_match
    }

    pub fn apply(&self, summaries: Vec<SearchSummary>) -> Vec<SearchSummary> {
        summaries.into_iter().filter(|s| self.matches(s)).collect()
    }
}

pub struct PubMedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PubMedClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(EUTILS_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, endpoint: &str, params: &str) -> String {
        let mut url = format!("{}/{}?{}", self.base_url, endpoint, params);
        if let Some(key) = &self.api_key {
            url.push_str("&api_key=");
            url.push_str(&urlencoding::encode(key));
        }
        url
    }

    /// GET with up to three attempts one second apart
    async fn fetch_with_retry(&self, url: &str) -> anyhow::Result<String> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, "E-utilities request failed, retrying: {}", e);
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E-utilities request failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("E-utilities returned HTTP {}", status);
        }
        response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read E-utilities response: {}", e))
    }

    async fn fetch_json(&self, url: &str) -> anyhow::Result<Value> {
        let body = self.fetch_with_retry(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| anyhow::anyhow!("Failed to parse E-utilities response: {}", e))
    }

    async fn esearch(&self, db: &str, term: &str, max_results: usize) -> anyhow::Result<Vec<String>> {
        let url = self.url(
            "esearch.fcgi",
            &format!(
                "db={}&term={}&retmode=json&retmax={}",
                db,
                urlencoding::encode(term),
                max_results
            ),
        );
        let data = self.fetch_json(&url).await?;
        let ids = data["esearchresult"]["idlist"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("No id list in esearch response"))?
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect::<Vec<_>>();
        debug!(db, term, count = ids.len(), "esearch returned ids");
        Ok(ids)
    }

    async fn esummary(&self, db: &str, ids: &[String]) -> anyhow::Result<Value> {
        let url = self.url(
            "esummary.fcgi",
            &format!("db={}&id={}&retmode=json", db, ids.join(",")),
        );
        self.fetch_json(&url).await
    }

    async fn efetch_abstracts(&self, ids: &[String]) -> anyhow::Result<HashMap<String, String>> {
        let url = self.url(
            "efetch.fcgi",
            &format!("db=pubmed&id={}&rettype=abstract&retmode=xml", ids.join(",")),
        );
        let xml = self.fetch_with_retry(&url).await?;
        parse_abstracts(&xml)
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchSummary>> {
        info!(query, "Searching PubMed");
        let ids = self.esearch("pubmed", query, max_results).await?;
        if ids.is_empty() {
            info!(query, "PubMed search found no articles");
            return Ok(Vec::new());
        }
        let summaries = parse_summaries(&self.esummary("pubmed", &ids).await?);
        info!(query, count = summaries.len(), "PubMed search completed");
        Ok(summaries)
    }

    async fn fetch_documents(&self, ids: &[String]) -> anyhow::Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let summaries = parse_summaries(&self.esummary("pubmed", ids).await?);
        let mut abstracts = match self.efetch_abstracts(ids).await {
            Ok(abstracts) => abstracts,
            Err(e) => {
                // Documents are still usable for citation without an abstract.
                warn!("Failed to fetch abstracts, saving without them: {}", e);
                HashMap::new()
            }
        };

        Ok(summaries
            .into_iter()
            .map(|summary| {
                let abstract_text = abstracts.remove(&summary.uid);
                summary.into_document(abstract_text)
            })
            .collect())
    }
}

#[async_trait]
impl MeshVocabulary for PubMedClient {
    async fn lookup_terms(&self, text: &str) -> anyhow::Result<Vec<Term>> {
        let ids = self.esearch("mesh", text, DEFAULT_MAX_RESULTS).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let terms = parse_mesh_terms(&self.esummary("mesh", &ids).await?);
        info!(text, count = terms.len(), "MeSH lookup completed");
        Ok(terms)
    }
}

/// Entries of an esummary `result` object, in `uids` order when present
fn summary_entries(data: &Value) -> Vec<&Value> {
    let result = &data["result"];
    match result["uids"].as_array() {
        Some(uids) => uids
            .iter()
            .filter_map(|uid| uid.as_str())
            .filter_map(|uid| result.get(uid))
            .collect(),
        None => result
            .as_object()
            .map(|map| map.values().filter(|item| item.get("uid").is_some()).collect())
            .unwrap_or_default(),
    }
}

fn first_string(value: &Value) -> Option<String> {
    value
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .map(String::from)
}

pub fn parse_summaries(data: &Value) -> Vec<SearchSummary> {
    summary_entries(data)
        .into_iter()
        .filter_map(|item| {
            let uid = item["uid"].as_str()?.to_string();
            let authors = item["authors"]
                .as_array()
                .map(|authors| {
                    authors
                        .iter()
                        .filter_map(|author| author["name"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            let journal = item["fulljournalname"]
                .as_str()
                .or_else(|| item["source"].as_str())
                .filter(|j| !j.is_empty())
                .map(String::from);

            Some(SearchSummary {
                uid,
                title: item["title"].as_str().unwrap_or_default().to_string(),
                authors,
                pubdate: item["pubdate"].as_str().unwrap_or_default().to_string(),
                journal,
                language: first_string(&item["lang"]),
                article_type: first_string(&item["pubtype"]),
            })
        })
        .collect()
}

pub fn parse_mesh_terms(data: &Value) -> Vec<Term> {
    summary_entries(data)
        .into_iter()
        .filter_map(|item| {
            first_string(&item["ds_meshterms"]).or_else(|| item["name"].as_str().map(String::from))
        })
        .map(Term::from)
        .collect()
}

/// Abstracts keyed by PMID from an efetch `PubmedArticleSet`.
///
/// Structured abstracts keep their section labels, one section per line.
pub fn parse_abstracts(xml: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut abstracts = HashMap::new();

    let mut pmid: Option<String> = None;
    let mut in_pmid = false;
    let mut in_abstract = false;
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    pmid = None;
                    sections.clear();
                }
                b"PMID" if pmid.is_none() => in_pmid = true,
                b"AbstractText" => {
                    in_abstract = true;
                    current.clear();
                    if let Some(label) = e.try_get_attribute("Label")? {
                        current.push_str(&label.unescape_value()?);
                        current.push_str(": ");
                    }
                }
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape()?;
                if in_pmid {
                    pmid = Some(text.trim().to_string());
                } else if in_abstract {
                    current.push_str(&text);
                }
            }
            Event::CData(e) => {
                if in_abstract {
                    current.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"PMID" => in_pmid = false,
                b"AbstractText" => {
                    in_abstract = false;
                    let section = current.trim();
                    if !section.is_empty() {
                        sections.push(section.to_string());
                    }
                }
                b"PubmedArticle" => {
                    if let Some(id) = pmid.take() {
                        if !sections.is_empty() {
                            abstracts.insert(id, sections.join("\n"));
                        }
                    }
                    sections.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(abstracts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(pubdate: &str, authors: &[&str]) -> SearchSummary {
        SearchSummary {
            uid: "1".to_string(),
            title: "T".to_string(),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            pubdate: pubdate.to_string(),
            journal: None,
            language: None,
            article_type: None,
        }
    }

    #[test]
    fn filter_matches_year_and_author() {
        let item = summary("2021 Mar 4", &["Smith J", "Okafor N"]);

        assert!(SearchFilter::default().matches(&item));
        assert!(SearchFilter::new(Some("2021".into()), None).matches(&item));
        assert!(!SearchFilter::new(Some("2020".into()), None).matches(&item));
        assert!(SearchFilter::new(None, Some("okafor".into())).matches(&item));
        assert!(!SearchFilter::new(Some("2021".into()), Some("Lee".into())).matches(&item));
        assert!(SearchFilter::new(Some("  ".into()), Some("".into())).matches(&item));
    }

    #[test]
    fn summaries_follow_uid_order() {
        let data = json!({
            "header": {"type": "esummary"},
            "result": {
                "uids": ["222", "111"],
                "111": {
                    "uid": "111",
                    "title": "Second",
                    "pubdate": "2019",
                    "authors": [{"name": "Lee K", "authtype": "Author"}],
                    "source": "BMJ",
                    "lang": ["eng"],
                    "pubtype": ["Review"]
                },
                "222": {
                    "uid": "222",
                    "title": "First",
                    "pubdate": "2022 Jan",
                    "authors": [],
                    "fulljournalname": "The Lancet"
                }
            }
        });

        let summaries = parse_summaries(&data);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].uid, "222");
        assert_eq!(summaries[0].journal.as_deref(), Some("The Lancet"));
        assert_eq!(summaries[1].authors, ["Lee K"]);
        assert_eq!(summaries[1].journal.as_deref(), Some("BMJ"));
        assert_eq!(summaries[1].language.as_deref(), Some("eng"));
        assert_eq!(summaries[1].article_type.as_deref(), Some("Review"));
    }

    #[test]
    fn mesh_terms_use_the_preferred_heading() {
        let data = json!({
            "result": {
                "uids": ["68018805", "68000001"],
                "68018805": {"uid": "68018805", "ds_meshterms": ["Sepsis", "Bloodstream Infection"]},
                "68000001": {"uid": "68000001", "name": "Calcimycin"}
            }
        });
        assert_eq!(
            parse_mesh_terms(&data),
            vec![Term::from("Sepsis"), Term::from("Calcimycin")]
        );
        assert!(parse_mesh_terms(&json!({})).is_empty());
    }

    #[test]
    fn abstracts_are_keyed_by_pmid() {
        let xml = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">31452104</PMID>
      <Article>
        <ArticleTitle>Lactate in sepsis</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Lactate &amp; outcomes in <i>adult</i> sepsis.</AbstractText>
          <AbstractText Label="RESULTS">Mortality fell.</AbstractText>
        </Abstract>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID Version="1">11111111</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">20000000</PMID>
      <Article><ArticleTitle>No abstract</ArticleTitle></Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

        let abstracts = parse_abstracts(xml).unwrap();
        assert_eq!(abstracts.len(), 1);
        assert_eq!(
            abstracts["31452104"],
            "BACKGROUND: Lactate & outcomes in adult sepsis.\nRESULTS: Mortality fell."
        );
    }

    #[test]
    fn urls_carry_the_api_key() {
        let client = PubMedClient::with_base_url("http://localhost:9/eutils/", Some("k".into()));
        assert_eq!(
            client.url("esearch.fcgi", "db=pubmed"),
            "http://localhost:9/eutils/esearch.fcgi?db=pubmed&api_key=k"
        );
    }
}
