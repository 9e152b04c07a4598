//! Sentence alignment.
//!
//! The model is asked to return one line per sentence in the grammar
//! `index | target sentence | source sentence`. Lines that do not fit are
//! dropped; the survivors are renumbered `1..=N` in response order.

use std::sync::Arc;

use crate::item::SentencePair;
use crate::llm::{GenerationRequest, ModelSpec, TextGenerator};
use crate::prompt::PromptTemplate;
use crate::retry::RetryPolicy;
use crate::{Result, StudyDeckError};

const DELIMITER: char = '|';

/// Splits an item's two texts into aligned sentence pairs.
pub struct Aligner {
    generator: Arc<dyn TextGenerator>,
    model: ModelSpec,
    prompt: PromptTemplate,
    policy: RetryPolicy,
}

impl Aligner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        model: ModelSpec,
        prompt: PromptTemplate,
        policy: RetryPolicy,
    ) -> Self {
        Self { generator, model, prompt, policy }
    }

    /// Aligns `source_text` with `target_text`.
    ///
    /// An unusable response is retried like any other transient failure.
    pub async fn align(&self, item_id: &str, source_text: &str, target_text: &str) -> Result<Vec<SentencePair>> {
        let prompt = self.prompt.render(&[("source_text", source_text), ("target_text", target_text)]);
        let request = &GenerationRequest::text(&self.model, prompt);
        let generator = &self.generator;
        let operation = format!("align {}", item_id);

        let pairs = self
            .policy
            .run(&operation, move |_| async move {
                let response = generator.generate(request).await?;
                parse_alignment(&response)
            })
            .await?;

        tracing::debug!(item = item_id, sentences = pairs.len(), "Aligned");
        Ok(pairs)
    }
}

/// Parses the aligner's line grammar.
///
/// # Errors
///
/// [`StudyDeckError::MalformedResponse`] when not a single line is usable.
pub fn parse_alignment(response: &str) -> Result<Vec<SentencePair>> {
    let pairs: Vec<SentencePair> = response
        .lines()
        .filter_map(parse_line)
        .enumerate()
        .map(|(i, (target, source))| SentencePair::new(i + 1, source, target))
        .collect();

    if pairs.is_empty() {
        return Err(StudyDeckError::MalformedResponse("no aligned sentence lines in response".to_string()));
    }
    Ok(pairs)
}

/// `(target, source)` for a well-formed line.
fn parse_line(line: &str) -> Option<(String, String)> {
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
    let [index, target, source] = fields.as_slice() else {
        return None;
    };

    if index.parse::<usize>().is_err() || target.is_empty() || source.is_empty() {
        return None;
    }
    Some((target.to_string(), source.to_string()))
}
