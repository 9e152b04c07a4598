//! Checkpointed batch driver for the note stage.
//!
//! Every raw checkpoint in the input directory is one work item. Items whose
//! processed checkpoint already exists are skipped without touching the
//! model, so an interrupted run resumes where it stopped. Items run
//! concurrently up to `item_workers`; a failed item is recorded and the run
//! moves on.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::align::Aligner;
use crate::checkpoint::{CheckpointDir, WorkItem, read_json};
use crate::config::PipelineConfig;
use crate::item::{ProcessedItem, RawItem};
use crate::llm::TextGenerator;
use crate::notes::NoteGenerator;
use crate::prompt::PromptSet;
use crate::report::{BatchReport, ItemOutcome};
use crate::{Result, StudyDeckError};

/// Aligns and annotates raw items into processed checkpoints.
pub struct BatchDriver {
    aligner: Aligner,
    notes: NoteGenerator,
    input: CheckpointDir,
    output: CheckpointDir,
    prompt_version: String,
    item_workers: usize,
    item_delay: Duration,
}

impl BatchDriver {
    pub fn new(aligner: Aligner, notes: NoteGenerator, input: CheckpointDir, output: CheckpointDir) -> Self {
        Self {
            aligner,
            notes,
            input,
            output,
            prompt_version: PromptSet::default().version_label(),
            item_workers: 1,
            item_delay: Duration::ZERO,
        }
    }

    /// Wires a driver from configuration around one text generator.
    pub fn from_config(config: &PipelineConfig, generator: Arc<dyn TextGenerator>, prompts: &PromptSet) -> Self {
        let aligner =
            Aligner::new(generator.clone(), config.models.align.clone(), prompts.align.clone(), config.retry.llm);
        let notes = NoteGenerator::new(generator, &config.models, prompts, config.retry.llm, config.pool.draft_workers);

        Self::new(
            aligner,
            notes,
            CheckpointDir::new(&config.paths.raw_dir),
            CheckpointDir::new(&config.paths.processed_dir),
        )
        .prompt_version(prompts.version_label())
        .item_workers(config.pool.item_workers)
        .item_delay(config.pool.item_delay)
    }

    pub fn prompt_version(mut self, version: impl Into<String>) -> Self {
        self.prompt_version = version.into();
        self
    }

    pub fn item_workers(mut self, workers: usize) -> Self {
        self.item_workers = workers.max(1);
        self
    }

    pub fn item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Processes every raw checkpoint in the input directory.
    pub async fn run(&self) -> Result<BatchReport> {
        let items = self.input.list()?;
        tracing::info!(items = items.len(), input = %self.input.root().display(), "Starting note generation");
        Ok(self.run_items(&items).await)
    }

    /// Processes the given work items.
    pub async fn run_items(&self, items: &[WorkItem]) -> BatchReport {
        let outcomes: Vec<(String, ItemOutcome)> = stream::iter(items)
            .map(|work| async move {
                let outcome = self.process(work).await;
                if outcome != ItemOutcome::Skipped && !self.item_delay.is_zero() {
                    tokio::time::sleep(self.item_delay).await;
                }
                (work.id.clone(), outcome)
            })
            .buffer_unordered(self.item_workers)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (id, outcome) in outcomes {
            report.record(id, outcome);
        }
        report.sort();

        tracing::info!(
            committed = report.committed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Note generation finished"
        );
        report
    }

    /// Runs one item through alignment and both note passes.
    pub async fn process(&self, work: &WorkItem) -> ItemOutcome {
        if self.output.exists(&work.id) {
            tracing::debug!(id = %work.id, "Processed checkpoint exists, skipping");
            return ItemOutcome::Skipped;
        }

        tracing::info!(id = %work.id, "Processing item");
        match self.build(work).await {
            Ok(sentences) => {
                tracing::info!(id = %work.id, sentences, "Item committed");
                ItemOutcome::Committed
            }
            Err(err) => {
                tracing::warn!(id = %work.id, error = %err, "Item failed");
                ItemOutcome::Failed(err.to_string())
            }
        }
    }

    async fn build(&self, work: &WorkItem) -> Result<usize> {
        let raw: RawItem = read_json(&work.path)?;
        if !raw.is_complete() {
            return Err(StudyDeckError::MissingField { field: "source_text/target_text".to_string() });
        }

        let pairs = self.aligner.align(&work.id, &raw.source_text, &raw.target_text).await?;
        let notes = self.notes.generate_notes(&raw, &pairs).await?;

        let mut processed = ProcessedItem::assemble(&raw, &pairs, &notes).ok_or_else(|| {
            StudyDeckError::MalformedResponse(format!("{} notes for {} sentences", notes.len(), pairs.len()))
        })?;
        processed.prompt_version = Some(self.prompt_version.clone());

        self.output.write(&work.id, &processed)?;
        Ok(processed.sentences.len())
    }
}
