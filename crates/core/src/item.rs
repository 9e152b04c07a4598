//! Data carried between pipeline stages.
//!
//! [`RawItem`] is what the harvester (or the bundle splitter) persists,
//! [`ProcessedItem`] is what the batch driver persists after both note
//! passes. [`DraftNote`] only lives in memory while an item is processed.

use serde::{Deserialize, Serialize};

/// One lesson or exam article as scraped from its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    /// Item identity, also the checkpoint file stem.
    pub id: String,

    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Text in the studied language.
    #[serde(alias = "english", alias = "reference_translation_en")]
    pub source_text: String,

    /// Translation of the text.
    #[serde(alias = "chinese", alias = "source_text_cn")]
    pub target_text: String,

    /// Word list shipped with the lesson, one entry per line.
    #[serde(default, alias = "vocabulary")]
    pub glossary_text: String,
}

impl RawItem {
    /// Creates an item without a title.
    pub fn new(
        id: impl Into<String>,
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        glossary_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: None,
            source_text: source_text.into(),
            target_text: target_text.into(),
            glossary_text: glossary_text.into(),
        }
    }

    /// Both texts are present, so the item can be aligned.
    pub fn is_complete(&self) -> bool {
        !self.source_text.trim().is_empty() && !self.target_text.trim().is_empty()
    }

    /// Returns the name of the first field that differs from `other`.
    ///
    /// The id and title are ignored; only the three scraped fields count.
    pub fn first_difference(&self, other: &RawItem) -> Option<&'static str> {
        if self.source_text != other.source_text {
            Some("source_text")
        } else if self.target_text != other.target_text {
            Some("target_text")
        } else if self.glossary_text != other.glossary_text {
            Some("glossary_text")
        } else {
            None
        }
    }
}

/// One aligned sentence of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentencePair {
    /// 1-based position within the item.
    #[serde(rename = "sentence_index")]
    pub index: usize,
    pub source_sentence: String,
    pub target_sentence: String,
}

impl SentencePair {
    pub fn new(index: usize, source_sentence: impl Into<String>, target_sentence: impl Into<String>) -> Self {
        Self { index, source_sentence: source_sentence.into(), target_sentence: target_sentence.into() }
    }
}

/// First-pass scaffolding note for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftNote {
    pub sentence_index: usize,
    pub text: String,
}

/// Refined, context-aware note for one sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalNote {
    pub sentence_index: usize,
    pub text: String,
}

/// A sentence pair together with its final note, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedSentence {
    pub sentence_index: usize,
    pub source_sentence: String,
    pub target_sentence: String,
    pub final_note: String,
}

/// A fully annotated item, the unit of the note checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Versions of the prompt templates that produced the notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,

    pub sentences: Vec<ProcessedSentence>,
}

impl ProcessedItem {
    /// Zips pairs with their final notes.
    ///
    /// Returns `None` unless every pair has exactly one note with a matching
    /// index, so an incomplete note set can never become a checkpoint.
    pub fn assemble(raw: &RawItem, pairs: &[SentencePair], notes: &[FinalNote]) -> Option<Self> {
        if pairs.len() != notes.len() {
            return None;
        }

        let sentences = pairs
            .iter()
            .zip(notes)
            .map(|(pair, note)| {
                (pair.index == note.sentence_index).then(|| ProcessedSentence {
                    sentence_index: pair.index,
                    source_sentence: pair.source_sentence.clone(),
                    target_sentence: pair.target_sentence.clone(),
                    final_note: note.text.clone(),
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self { id: raw.id.clone(), title: raw.title.clone(), prompt_version: None, sentences })
    }

    /// Every sentence index from 1 to N appears once and every note is non-empty.
    pub fn is_complete(&self) -> bool {
        !self.sentences.is_empty()
            && self
                .sentences
                .iter()
                .enumerate()
                .all(|(i, s)| s.sentence_index == i + 1 && !s.final_note.trim().is_empty())
    }
}
