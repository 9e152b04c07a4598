//! Two-pass note generation.
//!
//! Pass 1 drafts a note per sentence, concurrently and with a cheap model.
//! A draft that keeps failing is replaced by a placeholder so the item can
//! still proceed. Pass 2 walks the sentences in order with the stronger
//! model, giving each call its own draft, every sibling draft and the final
//! notes written so far. A sentence whose refinement exhausts its retries
//! fails the whole item.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::config::ModelsConfig;
use crate::item::{DraftNote, FinalNote, RawItem, SentencePair};
use crate::llm::{GenerationRequest, ModelSpec, TextGenerator};
use crate::prompt::{PromptSet, PromptTemplate};
use crate::retry::RetryPolicy;
use crate::{Result, StudyDeckError};

/// Draft text used when pass 1 gives up on a sentence.
pub const DRAFT_PLACEHOLDER: &str = "(draft unavailable)";

/// Response shape requested from the refinement model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineFormat {
    /// The whole response is the note.
    #[default]
    Text,
    /// A JSON array of `{sentence_index, final_note}` objects.
    Json,
}

#[derive(Debug, Deserialize)]
struct RefineEntry {
    sentence_index: usize,
    final_note: String,
}

/// Runs both note passes for one item at a time.
pub struct NoteGenerator {
    generator: Arc<dyn TextGenerator>,
    draft_model: ModelSpec,
    refine_model: ModelSpec,
    draft_prompt: PromptTemplate,
    refine_prompt: PromptTemplate,
    refine_format: RefineFormat,
    policy: RetryPolicy,
    draft_workers: usize,
}

impl NoteGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        models: &ModelsConfig,
        prompts: &PromptSet,
        policy: RetryPolicy,
        draft_workers: usize,
    ) -> Self {
        Self {
            generator,
            draft_model: models.draft.clone(),
            refine_model: models.refine.clone(),
            draft_prompt: prompts.draft.clone(),
            refine_prompt: prompts.refine.clone(),
            refine_format: models.refine_format,
            policy,
            draft_workers: draft_workers.max(1),
        }
    }

    /// Produces one final note per pair, in index order.
    ///
    /// # Errors
    ///
    /// Fails when any refinement exhausts its retries, or when either pass
    /// hits an irrecoverable error. Nothing is returned for a failed item.
    pub async fn generate_notes(&self, item: &RawItem, pairs: &[SentencePair]) -> Result<Vec<FinalNote>> {
        let drafts = self.draft_all(item, pairs).await?;
        tracing::debug!(item = %item.id, drafts = drafts.len(), "Drafts ready");

        let mut finals: Vec<FinalNote> = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let text = self.refine(item, pair, &drafts, &finals).await?;
            tracing::debug!(item = %item.id, sentence = pair.index, "Note refined");
            finals.push(FinalNote { sentence_index: pair.index, text });
        }

        Ok(finals)
    }

    async fn draft_all(&self, item: &RawItem, pairs: &[SentencePair]) -> Result<Vec<DraftNote>> {
        let results: Vec<Result<DraftNote>> = stream::iter(pairs)
            .map(|pair| self.draft(item, pair))
            .buffered(self.draft_workers)
            .collect()
            .await;

        results.into_iter().collect()
    }

    async fn draft(&self, item: &RawItem, pair: &SentencePair) -> Result<DraftNote> {
        let prompt = self.draft_prompt.render(&[
            ("source_sentence", pair.source_sentence.as_str()),
            ("target_sentence", pair.target_sentence.as_str()),
            ("glossary", item.glossary_text.as_str()),
        ]);
        let request = &GenerationRequest::text(&self.draft_model, prompt);
        let generator = &self.generator;
        let operation = format!("draft {} sentence {}", item.id, pair.index);

        let outcome = self
            .policy
            .run(&operation, move |_| async move {
                let text = generator.generate(request).await?;
                non_empty(text.trim())
            })
            .await;

        match outcome {
            Ok(text) => Ok(DraftNote { sentence_index: pair.index, text }),
            Err(StudyDeckError::RetriesExhausted { last_error, .. }) => {
                tracing::warn!(item = %item.id, sentence = pair.index, error = %last_error, "Using placeholder draft");
                Ok(DraftNote { sentence_index: pair.index, text: DRAFT_PLACEHOLDER.to_string() })
            }
            Err(err) => Err(err),
        }
    }

    async fn refine(
        &self,
        item: &RawItem,
        pair: &SentencePair,
        drafts: &[DraftNote],
        finals: &[FinalNote],
    ) -> Result<String> {
        let own_draft = drafts
            .iter()
            .find(|d| d.sentence_index == pair.index)
            .map_or(DRAFT_PLACEHOLDER, |d| d.text.as_str());
        let siblings = numbered(
            drafts
                .iter()
                .filter(|d| d.sentence_index != pair.index)
                .map(|d| (d.sentence_index, &d.text)),
        );
        let earlier = numbered(finals.iter().map(|n| (n.sentence_index, &n.text)));
        let index = pair.index.to_string();

        let prompt = self.refine_prompt.render(&[
            ("sentence_index", index.as_str()),
            ("source_sentence", pair.source_sentence.as_str()),
            ("target_sentence", pair.target_sentence.as_str()),
            ("draft_note", own_draft),
            ("sibling_drafts", siblings.as_str()),
            ("finalized_notes", earlier.as_str()),
            ("source_text", item.source_text.as_str()),
            ("target_text", item.target_text.as_str()),
        ]);

        let request = &match self.refine_format {
            RefineFormat::Text => GenerationRequest::text(&self.refine_model, prompt),
            RefineFormat::Json => GenerationRequest::json(&self.refine_model, prompt, refine_schema()),
        };
        let generator = &self.generator;
        let format = self.refine_format;
        let sentence_index = pair.index;
        let operation = format!("refine {} sentence {}", item.id, pair.index);

        self.policy
            .run(&operation, move |_| async move {
                let response = generator.generate(request).await?;
                match format {
                    RefineFormat::Text => non_empty(response.trim()),
                    RefineFormat::Json => parse_refine_json(&response, sentence_index),
                }
            })
            .await
    }
}

fn non_empty(text: &str) -> Result<String> {
    if text.is_empty() {
        return Err(StudyDeckError::EmptyResponse { reason: "blank text".to_string() });
    }
    Ok(text.to_string())
}

fn numbered<'a>(entries: impl Iterator<Item = (usize, &'a String)>) -> String {
    let blocks: Vec<String> = entries.map(|(i, text)| format!("[Sentence {}]\n{}", i, text)).collect();
    if blocks.is_empty() { "(none)".to_string() } else { blocks.join("\n\n") }
}

fn refine_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "sentence_index": { "type": "INTEGER" },
                "final_note": { "type": "STRING" }
            },
            "required": ["sentence_index", "final_note"]
        }
    })
}

/// Picks the note for `sentence_index` out of a JSON refinement response.
///
/// Code fences around the array are tolerated. A missing or blank entry is
/// [`StudyDeckError::MalformedResponse`], so the attempt is retried.
pub fn parse_refine_json(response: &str, sentence_index: usize) -> Result<String> {
    let body = strip_code_fence(response);
    let entries: Vec<RefineEntry> =
        serde_json::from_str(body).map_err(|e| StudyDeckError::MalformedResponse(format!("refinement JSON: {}", e)))?;

    entries
        .into_iter()
        .find(|e| e.sentence_index == sentence_index)
        .map(|e| e.final_note.trim().to_string())
        .filter(|note| !note.is_empty())
        .ok_or_else(|| StudyDeckError::MalformedResponse(format!("no note for sentence {}", sentence_index)))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers by the prompt's first line and records every prompt.
    struct EchoModel {
        prompts: Mutex<Vec<String>>,
        fail_drafts: bool,
        refine_failures_for: Option<usize>,
        draft_delay: Duration,
        calls: AtomicUsize,
        drafts_in_flight: AtomicUsize,
        peak_drafts: AtomicUsize,
    }

    impl EchoModel {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail_drafts: false,
                refine_failures_for: None,
                draft_delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                drafts_in_flight: AtomicUsize::new(0),
                peak_drafts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for EchoModel {
        async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let head = request.prompt.lines().next().unwrap_or_default().to_string();

            if head.starts_with("DRAFT") {
                let in_flight = self.drafts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_drafts.fetch_max(in_flight, Ordering::SeqCst);
                tokio::time::sleep(self.draft_delay).await;
                self.drafts_in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.fail_drafts {
                    return Err(StudyDeckError::EmptyResponse { reason: "SAFETY".into() });
                }
                return Ok(format!("draft of {}", &head[6..]));
            }
            if let Some(bad) = self.refine_failures_for
                && head == format!("REFINE {}", bad)
            {
                return Err(StudyDeckError::EmptyResponse { reason: "RECITATION".into() });
            }
            Ok(format!("final {}", &head[7..]))
        }
    }

    fn generator(model: Arc<EchoModel>) -> NoteGenerator {
        generator_with_workers(model, 4)
    }

    fn generator_with_workers(model: Arc<EchoModel>, draft_workers: usize) -> NoteGenerator {
        let prompts = PromptSet {
            draft: PromptTemplate::new("draft", "DRAFT {source_sentence}\n{glossary}"),
            refine: PromptTemplate::new(
                "refine",
                "REFINE {sentence_index}\nown: {draft_note}\nsiblings: {sibling_drafts}\nearlier: {finalized_notes}",
            ),
            ..PromptSet::default()
        };
        NoteGenerator::new(model, &ModelsConfig::default(), &prompts, RetryPolicy::immediate(3), draft_workers)
    }

    fn pairs() -> Vec<SentencePair> {
        (1..=3).map(|i| SentencePair::new(i, format!("S{}", i), format!("T{}", i))).collect()
    }

    fn item() -> RawItem {
        RawItem::new("lesson_001", "S1 S2 S3", "T1T2T3", "word n.")
    }

    #[tokio::test]
    async fn test_notes_in_index_order_with_context() {
        let model = Arc::new(EchoModel::new());
        let notes = generator(model.clone()).generate_notes(&item(), &pairs()).await.unwrap();

        let indices: Vec<_> = notes.iter().map(|n| n.sentence_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(notes[0].text, "final 1");

        let prompts = model.prompts.lock().unwrap();
        let third = prompts.iter().find(|p| p.starts_with("REFINE 3")).unwrap();
        assert!(third.contains("own: draft of S3"));
        assert!(third.contains("draft of S1") && third.contains("draft of S2"));
        assert!(!third.contains("siblings: [Sentence 3]"));
        assert!(third.contains("earlier: [Sentence 1]\nfinal 1\n\n[Sentence 2]\nfinal 2"));

        let first = prompts.iter().find(|p| p.starts_with("REFINE 1")).unwrap();
        assert!(first.contains("earlier: (none)"));
    }

    #[tokio::test]
    async fn test_draft_workers_bound_requests_in_flight() {
        let model = Arc::new(EchoModel { draft_delay: Duration::from_millis(20), ..EchoModel::new() });
        let pairs: Vec<_> = (1..=7).map(|i| SentencePair::new(i, format!("S{}", i), format!("T{}", i))).collect();
        let notes = generator_with_workers(model.clone(), 2).generate_notes(&item(), &pairs).await.unwrap();

        assert_eq!(notes.len(), 7);
        assert_eq!(notes[6].text, "final 7");
        assert_eq!(model.peak_drafts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_drafts_become_placeholders() {
        let model = Arc::new(EchoModel { fail_drafts: true, ..EchoModel::new() });
        let notes = generator(model.clone()).generate_notes(&item(), &pairs()).await.unwrap();

        assert_eq!(notes.len(), 3);
        let prompts = model.prompts.lock().unwrap();
        let refine = prompts.iter().find(|p| p.starts_with("REFINE 2")).unwrap();
        assert!(refine.contains(&format!("own: {}", DRAFT_PLACEHOLDER)));
        // 3 sentences x 3 draft attempts + 3 refinements
        assert_eq!(model.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_refine_exhaustion_fails_item() {
        let model = Arc::new(EchoModel { refine_failures_for: Some(3), ..EchoModel::new() });
        let result = generator(model).generate_notes(&item(), &pairs()).await;

        match result {
            Err(StudyDeckError::RetriesExhausted { operation, attempts, .. }) => {
                assert_eq!(operation, "refine lesson_001 sentence 3");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_refine_json() {
        let response = r#"[{"sentence_index": 1, "final_note": " one "}, {"sentence_index": 2, "final_note": "two"}]"#;
        assert_eq!(parse_refine_json(response, 1).unwrap(), "one");
        assert_eq!(parse_refine_json(response, 2).unwrap(), "two");
        assert!(matches!(parse_refine_json(response, 3), Err(StudyDeckError::MalformedResponse(_))));
    }

    #[test]
    fn test_parse_refine_json_fenced_and_invalid() {
        let fenced = "```json\n[{\"sentence_index\": 4, \"final_note\": \"four\"}]\n```";
        assert_eq!(parse_refine_json(fenced, 4).unwrap(), "four");

        let blank = r#"[{"sentence_index": 1, "final_note": "  "}]"#;
        assert!(matches!(parse_refine_json(blank, 1), Err(StudyDeckError::MalformedResponse(_))));
        assert!(matches!(parse_refine_json("not json", 1), Err(StudyDeckError::MalformedResponse(_))));
    }

    #[test]
    fn test_refine_format_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: RefineFormat,
        }
        let w: Wrapper = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(w.format, RefineFormat::Json);
    }
}
