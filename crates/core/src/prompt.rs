//! Versioned prompt templates.
//!
//! A [`PromptTemplate`] is a named text body with `{placeholder}` slots. Its
//! version is the first eight hex digits of the SHA-256 of the body, so any
//! edit to a template shows up in the checkpoints it produces.
//!
//! Built-in templates can be replaced per name by dropping `align.txt`,
//! `draft.txt` or `refine.txt` into a prompt directory.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::Result;

const ALIGN_TEMPLATE: &str = "\
Split a passage and its translation into aligned sentence pairs.

Rules:
1. The passage is authoritative: every sentence of it (ending in . ? or !) is exactly one output line.
2. Split or merge the translation as little as possible so that it matches the passage sentence by sentence.
3. Output one pair per line, with no commentary, no numbering other than the index and no code fences:
   index | translation sentence | passage sentence

Example:
1 | 上星期我去看戏。 | Last week I went to the theatre.
2 | 我的座位很好。 | I had a very good seat.

Passage:
{source_text}

Translation:
{target_text}
";

const DRAFT_TEMPLATE: &str = "\
You are a language teacher preparing a first draft of study notes for one sentence.
Write plain text, no Markdown or HTML, using numbered points:
1. Key words and phrases (two to five, with part of speech and common collocations).
2. Sentence structure (clause by clause, naming the basic pattern: S+V, S+V+O, S+V+P, S+V+o+O, S+V+O+C).
3. One or two simple example sentences reusing the pattern, each with a translation.

Lesson word list:
{glossary}

Sentence:
- Text: \"{source_sentence}\"
- Translation: \"{target_sentence}\"
";

const REFINE_TEMPLATE: &str = "\
You are an editor turning a draft study note into its final version.

Principles:
1. Be concise: remove anything repetitive or too basic. At most 100 words.
2. Link ideas: when a word, pattern or technique also appears in another sentence of this lesson, point it out and mark it with [Link].
3. Plain text only, numbered points, no Markdown.

Full lesson:
{source_text}

{target_text}

Sentence {sentence_index}:
- Text: \"{source_sentence}\"
- Translation: \"{target_sentence}\"

Draft for this sentence:
--- draft ---
{draft_note}
--- end of draft ---

Drafts for the other sentences of this lesson:
--- lesson context ---
{sibling_drafts}
--- end of lesson context ---

Final notes already written for earlier sentences:
--- earlier notes ---
{finalized_notes}
--- end of earlier notes ---

Write the final note for sentence {sentence_index} now.
";

/// A named, versioned prompt body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    version: String,
    body: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let version = content_version(&body);
        Self { name: name.into(), version, body }
    }

    /// Reads a template body from a file.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)?;
        Ok(Self::new(name, body))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name@version`, as recorded in checkpoints.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Substitutes each `{key}` with its value.
    ///
    /// Slots without a value are left as they are, so literal braces in a
    /// template body are harmless.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        values
            .iter()
            .fold(self.body.clone(), |acc, (key, value)| acc.replace(&format!("{{{}}}", key), value))
    }
}

fn content_version(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// The three templates the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub align: PromptTemplate,
    pub draft: PromptTemplate,
    pub refine: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            align: PromptTemplate::new("align", ALIGN_TEMPLATE),
            draft: PromptTemplate::new("draft", DRAFT_TEMPLATE),
            refine: PromptTemplate::new("refine", REFINE_TEMPLATE),
        }
    }
}

impl PromptSet {
    /// Built-in templates, each replaced by `<dir>/<name>.txt` when present.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut set = Self::default();
        let Some(dir) = dir else {
            return Ok(set);
        };

        for template in [&mut set.align, &mut set.draft, &mut set.refine] {
            let path = dir.join(format!("{}.txt", template.name));
            if path.is_file() {
                *template = PromptTemplate::from_file(template.name.clone(), &path)?;
                tracing::info!(name = %template.name, version = %template.version, "Using prompt override");
            }
        }

        Ok(set)
    }

    /// Labels of all three templates, recorded with each processed item.
    pub fn version_label(&self) -> String {
        format!("{} {} {}", self.align.label(), self.draft.label(), self.refine.label())
    }
}
