//! Splitting a hand-collected JSON array into raw checkpoints.
//!
//! Items that are not harvested from a lesson site (exam articles, for
//! example) are usually collected into one JSON array. The note stage
//! works on one file per item, so the array is split into raw checkpoints.

use std::path::Path;

use serde::Deserialize;

use crate::checkpoint::{CheckpointDir, read_json};
use crate::item::RawItem;
use crate::report::{BatchReport, ItemOutcome};
use crate::Result;

#[derive(Debug, Deserialize)]
struct BundleEntry {
    id: Option<String>,
    title: Option<String>,
    #[serde(alias = "english", alias = "reference_translation_en")]
    source_text: String,
    #[serde(alias = "chinese", alias = "source_text_cn")]
    target_text: String,
    #[serde(default, alias = "vocabulary")]
    glossary_text: String,
}

/// Writes one raw checkpoint per entry of the bundle at `bundle_path`.
///
/// Entries without an id get `{id_prefix}_{NNN}` from their 1-based
/// position. Entries whose checkpoint exists are skipped, entries missing a
/// text are recorded as failed.
pub fn unbundle(bundle_path: &Path, checkpoints: &CheckpointDir, id_prefix: &str) -> Result<BatchReport> {
    let entries: Vec<BundleEntry> = read_json(bundle_path)?;
    let mut report = BatchReport::default();

    for (position, entry) in entries.into_iter().enumerate() {
        let id = entry.id.unwrap_or_else(|| format!("{}_{:03}", id_prefix, position + 1));

        if checkpoints.exists(&id) {
            report.record(id, ItemOutcome::Skipped);
            continue;
        }

        let item = RawItem {
            id: id.clone(),
            title: entry.title,
            source_text: entry.source_text,
            target_text: entry.target_text,
            glossary_text: entry.glossary_text,
        };
        if !item.is_complete() {
            tracing::warn!(id = %id, "Bundle entry has an empty text");
            report.record(id, ItemOutcome::Failed("empty source or target text".to_string()));
            continue;
        }

        checkpoints.write(&id, &item)?;
        report.record(id, ItemOutcome::Committed);
    }

    tracing::info!(
        committed = report.committed.len(),
        skipped = report.skipped.len(),
        bundle = %bundle_path.display(),
        "Bundle split"
    );
    Ok(report)
}
