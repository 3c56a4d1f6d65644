//! Reference exports of the saved set.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fmt::Display;

use crate::error::{AssistantError, Result};
use crate::models::{Document, pubmed_url};

/// EndNote reference type number for journal articles
const JOURNAL_ARTICLE_REF_TYPE: &str = "17";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    EndNote,
}

impl ExportFormat {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("text") | Some("txt") => Ok(ExportFormat::Text),
            Some("endnote") | Some("xml") => Ok(ExportFormat::EndNote),
            Some(other) => Err(AssistantError::InvalidArgument(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain; charset=utf-8",
            ExportFormat::EndNote => "application/xml",
        }
    }

    pub fn render(&self, documents: &[Document]) -> Result<String> {
        match self {
            ExportFormat::Text => Ok(to_plain_text(documents)),
            ExportFormat::EndNote => to_endnote_xml(documents),
        }
    }
}

/// Numbered reference list, one entry per line
pub fn to_plain_text(documents: &[Document]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, document)| {
            let mut entry = format!("{}. ", i + 1);
            if !document.authors.is_empty() {
                entry.push_str(&document.authors.join(", "));
                entry.push_str(". ");
            }
            entry.push_str(document.title.trim_end_matches('.'));
            entry.push('.');
            if let Some(journal) = &document.journal {
                entry.push_str(&format!(" {}.", journal));
            }
            if let Some(year) = document.year {
                entry.push_str(&format!(" {}.", year));
            }
            entry.push_str(&format!(" PMID: {}. {}", document.id, document.external_ref));
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn xml_err(e: impl Display) -> AssistantError {
    AssistantError::Export(e.to_string())
}

fn open(writer: &mut Writer<Vec<u8>>, element: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Start(element)).map_err(xml_err)
}

fn close(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    open(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    close(writer, name)
}

fn write_record(writer: &mut Writer<Vec<u8>>, document: &Document) -> Result<()> {
    open(writer, BytesStart::new("record"))?;

    open(
        writer,
        BytesStart::new("ref-type").with_attributes([("name", "Journal Article")]),
    )?;
    writer
        .write_event(Event::Text(BytesText::new(JOURNAL_ARTICLE_REF_TYPE)))
        .map_err(xml_err)?;
    close(writer, "ref-type")?;

    open(writer, BytesStart::new("contributors"))?;
    open(writer, BytesStart::new("authors"))?;
    for author in &document.authors {
        text_element(writer, "author", author)?;
    }
    close(writer, "authors")?;
    close(writer, "contributors")?;

    open(writer, BytesStart::new("titles"))?;
    text_element(writer, "title", &document.title)?;
    close(writer, "titles")?;

    if let Some(year) = document.year {
        open(writer, BytesStart::new("dates"))?;
        text_element(writer, "year", &year.to_string())?;
        close(writer, "dates")?;
    }

    if let Some(journal) = &document.journal {
        open(writer, BytesStart::new("periodical"))?;
        text_element(writer, "full-title", journal)?;
        close(writer, "periodical")?;
    }

    text_element(writer, "accession-num", &document.id)?;

    open(writer, BytesStart::new("urls"))?;
    open(writer, BytesStart::new("related-urls"))?;
    text_element(writer, "url", &pubmed_url(&document.id))?;
    close(writer, "related-urls")?;
    close(writer, "urls")?;

    if let Some(article_type) = &document.article_type {
        open(writer, BytesStart::new("keywords"))?;
        text_element(writer, "keyword", article_type)?;
        close(writer, "keywords")?;
    }

    if let Some(language) = &document.language {
        text_element(writer, "language", language)?;
    }

    close(writer, "record")
}

/// EndNote XML import file for `documents`
pub fn to_endnote_xml(documents: &[Document]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    open(&mut writer, BytesStart::new("xml"))?;
    open(&mut writer, BytesStart::new("records"))?;
    for document in documents {
        write_record(&mut writer, document)?;
    }
    close(&mut writer, "records")?;
    close(&mut writer, "xml")?;

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut document = Document::new("31452104", "Lactate & sepsis <outcomes>");
        document.authors = vec!["Smith J".to_string(), "Okafor N".to_string()];
        document.year = Some(2019);
        document.journal = Some("Critical Care".to_string());
        document.article_type = Some("Journal Article".to_string());
        document.language = Some("eng".to_string());
        document
    }

    #[test]
    fn plain_text_lists_numbered_references() {
        let bare = Document::new("1", "Untitled.");
        let text = to_plain_text(&[sample(), bare]);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(
            lines[0],
            "1. Smith J, Okafor N. Lactate & sepsis <outcomes>. Critical Care. 2019. \
             PMID: 31452104. https://pubmed.ncbi.nlm.nih.gov/31452104/"
        );
        assert_eq!(lines[1], "2. Untitled. PMID: 1. https://pubmed.ncbi.nlm.nih.gov/1/");
        assert_eq!(to_plain_text(&[]), "");
    }

    #[test]
    fn endnote_record_has_expected_fields() {
        let xml = to_endnote_xml(&[sample()]).unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<ref-type name="Journal Article">17</ref-type>"#));
        assert!(xml.contains("<author>Okafor N</author>"));
        assert!(xml.contains("<title>Lactate &amp; sepsis &lt;outcomes&gt;</title>"));
        assert!(xml.contains("<year>2019</year>"));
        assert!(xml.contains("<full-title>Critical Care</full-title>"));
        assert!(xml.contains("<accession-num>31452104</accession-num>"));
        assert!(xml.contains("<url>https://pubmed.ncbi.nlm.nih.gov/31452104/</url>"));
        assert!(xml.contains("<keyword>Journal Article</keyword>"));
        assert!(xml.contains("<language>eng</language>"));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let xml = to_endnote_xml(&[Document::new("7", "Bare")]).unwrap();
        assert!(!xml.contains("<dates>"));
        assert!(!xml.contains("<periodical>"));
        assert!(!xml.contains("<keywords>"));
        assert!(xml.contains("<accession-num>7</accession-num>"));
    }

    #[test]
    fn format_names_are_parsed() {
        assert_eq!(ExportFormat::parse(None).unwrap(), ExportFormat::Text);
        assert_eq!(ExportFormat::parse(Some("EndNote")).unwrap(), ExportFormat::EndNote);
        assert!(ExportFormat::parse(Some("bibtex")).is_err());
    }
}
