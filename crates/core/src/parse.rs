//! HTML parsing and heading-anchored navigation.
//!
//! This module provides the [`Document`] and [`Element`] types used by the
//! page layouts in [`crate::extract`]. Lesson pages are not structured
//! documents: their sections are a labelled heading followed by loose
//! sibling nodes, so besides CSS selection the wrappers here can walk the
//! siblings that follow a heading.
//!
//! # Example
//!
//! ```rust
//! use studydeck_core::parse::Document;
//!
//! let html = r#"
//!     <div>
//!         <h3>Text</h3>
//!         <p>Hello.</p>
//!         <h3>Words</h3>
//!     </div>
//! "#;
//!
//! let doc = Document::parse(html);
//! let heading = doc.heading("h3", "Text").unwrap().unwrap();
//! assert_eq!(heading.section().len(), 1);
//! ```

use scraper::{ElementRef, Html, Node, Selector};

use crate::{Result, StudyDeckError};

/// A parsed HTML document.
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses HTML from a string.
    ///
    /// Parsing never fails; malformed markup is repaired the way browsers do.
    pub fn parse(html: &str) -> Self {
        Self { html: Html::parse_document(html) }
    }

    /// Selects elements using a CSS selector.
    ///
    /// # Errors
    ///
    /// Returns [`StudyDeckError::HtmlParseError`] if the selector is invalid.
    pub fn select(&'_ self, selector: &str) -> Result<Vec<Element<'_>>> {
        let sel = parse_selector(selector)?;
        Ok(self.html.select(&sel).map(|el| Element { element: el }).collect())
    }

    /// Gets the content of the `<title>` element if present.
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.html
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }

    /// Finds the first element matching `selector` whose trimmed text equals
    /// `label`.
    pub fn heading(&'_ self, selector: &str, label: &str) -> Result<Option<Element<'_>>> {
        let sel = parse_selector(selector)?;
        let label = label.trim();

        Ok(self
            .html
            .select(&sel)
            .find(|el| el.text().collect::<String>().trim() == label)
            .map(|el| Element { element: el }))
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| StudyDeckError::HtmlParseError(format!("Invalid selector: {}", e)))
}

/// One node following a heading.
#[derive(Debug, Clone)]
pub enum Segment<'a> {
    /// A bare text node, trimmed.
    Text(String),
    /// An element sibling.
    Element(Element<'a>),
}

/// A wrapper around scraper's ElementRef.
#[derive(Clone, Debug)]
pub struct Element<'a> {
    element: ElementRef<'a>,
}

impl<'a> Element<'a> {
    /// Gets the text content of this element.
    ///
    /// `<br>` is rendered as a line break; everything else is the plain
    /// concatenation of descendant text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in self.element.descendants() {
            match node.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) if el.name() == "br" => out.push('\n'),
                _ => {}
            }
        }
        out
    }

    /// Gets the lowercase tag name.
    pub fn tag_name(&self) -> String {
        self.element.value().name().to_lowercase()
    }

    /// Gets the inner HTML of this element.
    pub fn inner_html(&self) -> String {
        self.element.inner_html()
    }

    /// Sibling nodes after this element up to (not including) the next
    /// sibling with the same tag name.
    ///
    /// Whitespace-only text nodes and comments are skipped.
    pub fn section(&self) -> Vec<Segment<'a>> {
        let tag = self.tag_name();
        let mut segments = Vec::new();

        for node in self.element.next_siblings() {
            match node.value() {
                Node::Text(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        segments.push(Segment::Text(trimmed.to_string()));
                    }
                }
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(node) {
                        if element.value().name().eq_ignore_ascii_case(&tag) {
                            break;
                        }
                        segments.push(Segment::Element(Element { element }));
                    }
                }
                _ => {}
            }
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
        <!DOCTYPE html>
        <html lang="en">
        <head><title> Lesson 1 </title></head>
        <body>
            <div class="content">
                <h3>Text</h3>
                <p>Last week I went<br>to the theatre.</p>
                <h3>Words</h3>
                garden n. 花园
                <br>
                <!-- comment -->
                ticket n. 票
                <h3>Translation</h3>
                <p>上星期我去看戏。</p>
            </div>
        </body>
        </html>
    "#;

    #[test]
    fn test_title() {
        let doc = Document::parse(SAMPLE_HTML);
        assert_eq!(doc.title(), Some("Lesson 1".to_string()));
    }

    #[test]
    fn test_heading_lookup() {
        let doc = Document::parse(SAMPLE_HTML);
        let heading = doc.heading("h3", "Words").unwrap();
        assert!(heading.is_some());
        assert_eq!(heading.unwrap().tag_name(), "h3");

        assert!(doc.heading("h3", "Missing").unwrap().is_none());
    }

    #[test]
    fn test_section_stops_at_next_heading() {
        let doc = Document::parse(SAMPLE_HTML);
        let heading = doc.heading("h3", "Words").unwrap().unwrap();
        let section = heading.section();

        let texts: Vec<String> = section
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.clone()),
                Segment::Element(_) => None,
            })
            .collect();

        assert_eq!(texts, vec!["garden n. 花园", "ticket n. 票"]);
        assert!(section.iter().all(|s| match s {
            Segment::Element(e) => e.tag_name() != "h3",
            Segment::Text(_) => true,
        }));
    }

    #[test]
    fn test_text_renders_line_breaks() {
        let doc = Document::parse(SAMPLE_HTML);
        let paragraphs = doc.select("p").unwrap();
        assert_eq!(paragraphs[0].text(), "Last week I went\nto the theatre.");
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Document::parse(SAMPLE_HTML);
        assert!(matches!(doc.select("[[invalid"), Err(StudyDeckError::HtmlParseError(_))));
        assert!(matches!(doc.heading("[[invalid", "x"), Err(StudyDeckError::HtmlParseError(_))));
    }
}
