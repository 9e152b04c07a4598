//! Label-anchored field extraction.
//!
//! A [`PageLayout`] describes where the three fields of a lesson page live:
//! a heading selector plus one [`FieldRule`] per field naming the heading
//! label and how much of the following content to capture. Layouts are plain
//! data, so a site with different headings is a new configuration rather
//! than new code.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::item::RawItem;
use crate::parse::{Document, Element, Segment};
use crate::{Result, StudyDeckError};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// How much content after a heading belongs to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capture {
    /// Text of the first `<p>` sibling, whitespace collapsed.
    FirstParagraph,
    /// Every text line up to the next heading, one entry per line.
    UntilNextHeading,
}

/// Location of one field on the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldRule {
    /// Exact heading text announcing the field.
    pub label: String,
    pub capture: Capture,
}

impl FieldRule {
    pub fn new(label: impl Into<String>, capture: Capture) -> Self {
        Self { label: label.into(), capture }
    }
}

/// Extraction strategy for one family of lesson pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageLayout {
    /// CSS selector matching section headings.
    pub heading: String,
    /// Lesson text. Required.
    pub source: FieldRule,
    /// Translation. Required.
    pub target: FieldRule,
    /// Word list. Optional; an absent heading yields an empty glossary.
    pub glossary: FieldRule,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            heading: "h3".to_string(),
            source: FieldRule::new("新概念英语－课文", Capture::FirstParagraph),
            target: FieldRule::new("新概念英语－翻译", Capture::FirstParagraph),
            glossary: FieldRule::new("新概念英语－单词和短语", Capture::UntilNextHeading),
        }
    }
}

/// The three text fields of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub source_text: String,
    pub target_text: String,
    pub glossary_text: String,
}

impl ExtractedFields {
    /// Wraps the fields into a raw item with the given id.
    pub fn into_item(self, id: impl Into<String>) -> RawItem {
        RawItem::new(id, self.source_text, self.target_text, self.glossary_text)
    }
}

impl PageLayout {
    /// Extracts the fields from page markup.
    ///
    /// # Errors
    ///
    /// [`StudyDeckError::MissingField`] when the lesson text or translation
    /// is absent or empty, [`StudyDeckError::HtmlParseError`] when the
    /// heading selector is invalid.
    pub fn extract(&self, html: &str) -> Result<ExtractedFields> {
        let doc = Document::parse(html);

        let source_text = self.capture(&doc, &self.source)?;
        let target_text = self.capture(&doc, &self.target)?;
        let glossary_text = self.capture(&doc, &self.glossary)?;

        if source_text.is_empty() {
            return Err(StudyDeckError::MissingField { field: self.source.label.clone() });
        }
        if target_text.is_empty() {
            return Err(StudyDeckError::MissingField { field: self.target.label.clone() });
        }

        Ok(ExtractedFields { source_text, target_text, glossary_text })
    }

    fn capture(&self, doc: &Document, rule: &FieldRule) -> Result<String> {
        let Some(heading) = doc.heading(&self.heading, &rule.label)? else {
            return Ok(String::new());
        };

        let text = match rule.capture {
            Capture::FirstParagraph => first_paragraph(&heading),
            Capture::UntilNextHeading => section_lines(&heading),
        };

        Ok(text)
    }
}

fn first_paragraph(heading: &Element<'_>) -> String {
    heading
        .section()
        .into_iter()
        .find_map(|segment| match segment {
            Segment::Element(el) if el.tag_name() == "p" => Some(collapse_whitespace(&el.text())),
            _ => None,
        })
        .unwrap_or_default()
}

fn section_lines(heading: &Element<'_>) -> String {
    let mut lines = Vec::new();

    for segment in heading.section() {
        let text = match segment {
            Segment::Text(text) => text,
            Segment::Element(el) => el.text(),
        };
        lines.extend(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string));
    }

    lines.join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}
