//! Per-item outcomes of a stage run.

use std::fmt;

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Output checkpoint already present; no work done.
    Skipped,
    /// Output written (or side effect applied) in this run.
    Committed,
    /// Gave up on the item, with the reason.
    Failed(String),
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemOutcome::Skipped => write!(f, "skipped"),
            ItemOutcome::Committed => write!(f, "committed"),
            ItemOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of a run over many items.
///
/// Failures never stop a run; they are collected here and listed at the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub committed: Vec<String>,
    pub skipped: Vec<String>,
    /// Failed ids with the last error seen.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn record(&mut self, id: impl Into<String>, outcome: ItemOutcome) {
        let id = id.into();
        match outcome {
            ItemOutcome::Skipped => self.skipped.push(id),
            ItemOutcome::Committed => self.committed.push(id),
            ItemOutcome::Failed(reason) => self.failed.push((id, reason)),
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.committed.len() + self.skipped.len() + self.failed.len()
    }

    /// Orders every list by id, for runs that complete out of order.
    pub fn sort(&mut self) {
        self.committed.sort();
        self.skipped.sort();
        self.failed.sort();
    }
}
