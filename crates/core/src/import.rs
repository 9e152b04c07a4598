//! Flashcard import with tag-scoped duplicate detection.
//!
//! Every created note carries three tags: the collection tag, the item tag
//! and a sentence tag. Before creating anything for an item, the importer
//! reads the tags of the item's existing notes and leaves out sentences that
//! are already present, so importing the same file twice creates nothing the
//! second time. A processed file is moved to the imported directory only
//! once every one of its sentences is in the store.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::anki::{AnkiConfig, FlashcardStore, NewNote, NoteOptions};
use crate::checkpoint::{CheckpointDir, WorkItem, read_json};
use crate::item::{ProcessedItem, ProcessedSentence};
use crate::report::{BatchReport, ItemOutcome};
use crate::retry::RetryPolicy;
use crate::tts::SpeechSynthesizer;
use crate::{Result, StudyDeckError};

/// Note counts for one imported item.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub duplicates: usize,
}

/// Outcome of importing a directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Items with at least one new note are committed, items that were
    /// entirely present already are skipped.
    pub items: BatchReport,
    pub notes_added: usize,
    pub duplicates: usize,
}

/// Pushes processed items into a flashcard store.
pub struct Importer {
    store: Arc<dyn FlashcardStore>,
    tts: Arc<dyn SpeechSynthesizer>,
    config: AnkiConfig,
    policy: RetryPolicy,
    audio_extension: String,
}

impl Importer {
    pub fn new(
        store: Arc<dyn FlashcardStore>,
        tts: Arc<dyn SpeechSynthesizer>,
        config: AnkiConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self { store, tts, config, policy, audio_extension: "mp3".to_string() }
    }

    pub fn audio_extension(mut self, extension: impl Into<String>) -> Self {
        self.audio_extension = extension.into();
        self
    }

    /// Checks the store is reachable and creates the deck when missing.
    pub async fn prepare(&self) -> Result<()> {
        let decks = self.store.deck_names().await?;
        if !decks.iter().any(|d| d == &self.config.deck) {
            tracing::info!(deck = %self.config.deck, "Creating deck");
            self.store.create_deck(&self.config.deck).await?;
        }
        Ok(())
    }

    /// Sentence tags already present for `item_id`.
    async fn existing_tags(&self, item_id: &str) -> Result<HashSet<String>> {
        let ids = self.store.find_notes(&self.config.item_query(item_id)).await?;
        let notes = self.store.notes_info(&ids).await?;
        Ok(notes.into_iter().flat_map(|n| n.tags).collect())
    }

    /// Imports every sentence of `item` not yet in the store.
    ///
    /// # Errors
    ///
    /// Any synthesis, upload or creation failure fails the item; notes that
    /// were created before the failure are recognised on the next run.
    pub async fn import(&self, item: &ProcessedItem) -> Result<ImportSummary> {
        let existing = self.existing_tags(&item.id).await?;
        let mut summary = ImportSummary::default();
        let mut notes = Vec::new();

        for sentence in &item.sentences {
            let tag = self.config.sentence_tag(&item.id, sentence.sentence_index);
            if existing.contains(&tag) {
                tracing::debug!(id = %item.id, sentence = sentence.sentence_index, "Already imported");
                summary.duplicates += 1;
                continue;
            }

            let audio = self.upload_audio(&item.id, sentence).await?;
            notes.push(self.new_note(&item.id, sentence, &audio, tag));
        }

        if notes.is_empty() {
            return Ok(summary);
        }

        let created = self.store.add_notes(&notes).await?.into_iter().flatten().count();
        if created != notes.len() {
            return Err(StudyDeckError::AnkiConnect {
                action: "addNotes".to_string(),
                message: format!("only {} of {} notes were created", created, notes.len()),
            });
        }

        summary.added = notes.len();
        tracing::info!(id = %item.id, added = summary.added, duplicates = summary.duplicates, "Item imported");
        Ok(summary)
    }

    /// Synthesizes and stores the audio of one sentence, returning the
    /// stored file name.
    async fn upload_audio(&self, item_id: &str, sentence: &ProcessedSentence) -> Result<String> {
        let file_name = &self.config.audio_file_name(item_id, sentence.sentence_index, &self.audio_extension);
        let text = sentence.source_sentence.as_str();
        let tts = &self.tts;
        let store = &self.store;
        let operation = format!("audio {} sentence {}", item_id, sentence.sentence_index);

        self.policy
            .run(&operation, move |_| async move {
                let audio = tts.synthesize(text).await?;
                store.store_media_file(file_name, &audio).await
            })
            .await
    }

    fn new_note(&self, item_id: &str, sentence: &ProcessedSentence, audio: &str, sentence_tag: String) -> NewNote {
        let fields = BTreeMap::from([
            (self.config.source_field.clone(), sentence.source_sentence.clone()),
            (self.config.target_field.clone(), sentence.target_sentence.clone()),
            (self.config.note_field.clone(), sentence.final_note.replace('\n', "<br>")),
            (self.config.audio_field.clone(), format!("[sound:{}]", audio)),
        ]);

        NewNote {
            deck_name: self.config.deck.clone(),
            model_name: self.config.note_type.clone(),
            fields,
            tags: vec![self.config.collection_tag.clone(), self.config.item_tag(item_id), sentence_tag],
            // Duplicates are decided by tag; the same sentence may occur in several items.
            options: NoteOptions { allow_duplicate: true },
        }
    }

    /// Imports every processed file in `input` and moves each fully
    /// imported file to `imported_dir`.
    ///
    /// # Errors
    ///
    /// Only an unreachable store or unreadable directory fails the run;
    /// item failures are recorded in the report.
    pub async fn import_dir(&self, input: &CheckpointDir, imported_dir: &Path) -> Result<ImportReport> {
        self.prepare().await?;

        let items = input.list()?;
        tracing::info!(items = items.len(), deck = %self.config.deck, "Starting import");

        let mut report = ImportReport::default();
        for work in &items {
            let outcome = match self.import_file(input, work, imported_dir).await {
                Ok(summary) => {
                    report.notes_added += summary.added;
                    report.duplicates += summary.duplicates;
                    if summary.added == 0 { ItemOutcome::Skipped } else { ItemOutcome::Committed }
                }
                Err(err) => {
                    tracing::warn!(id = %work.id, error = %err, "Import failed");
                    ItemOutcome::Failed(err.to_string())
                }
            };
            report.items.record(&work.id, outcome);
        }

        Ok(report)
    }

    async fn import_file(&self, input: &CheckpointDir, work: &WorkItem, imported_dir: &Path) -> Result<ImportSummary> {
        let item: ProcessedItem = read_json(&work.path)?;
        if !item.is_complete() {
            return Err(StudyDeckError::MissingField { field: "final_note".to_string() });
        }

        let summary = self.import(&item).await?;
        input.relocate(&work.id, imported_dir)?;
        Ok(summary)
    }
}
