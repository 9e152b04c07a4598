//! Consistency-checked page harvesting.
//!
//! The lesson site occasionally serves truncated or half-rendered pages. A
//! page is therefore fetched twice per attempt and only accepted when both
//! copies yield identical fields. Accepted pages become [`RawItem`]
//! checkpoints; lessons whose checkpoint already exists are skipped.

use std::time::Duration;

use crate::checkpoint::CheckpointDir;
use crate::config::HarvestTarget;
use crate::extract::PageLayout;
use crate::fetch::Fetcher;
use crate::item::RawItem;
use crate::report::{BatchReport, ItemOutcome};
use crate::retry::RetryPolicy;
use crate::{Result, StudyDeckError};

/// Fetch-twice-and-compare harvester.
pub struct Harvester<F> {
    fetcher: F,
    layout: PageLayout,
    policy: RetryPolicy,
    verify_delay: Duration,
}

impl<F: Fetcher> Harvester<F> {
    /// `policy.max_attempts` bounds the attempts per page, `policy.delay`
    /// is the pause after a failed attempt and `verify_delay` the pause
    /// between the two fetches of one attempt.
    pub fn new(fetcher: F, layout: PageLayout, policy: RetryPolicy, verify_delay: Duration) -> Self {
        Self { fetcher, layout, policy, verify_delay }
    }

    async fn fetch_fields(&self, id: &str, locator: &str) -> Result<RawItem> {
        let html = self.fetcher.fetch(locator).await?;
        Ok(self.layout.extract(&html)?.into_item(id))
    }

    /// One attempt: two fetches that must agree field for field.
    async fn fetch_verified(&self, id: &str, locator: &str) -> Result<RawItem> {
        let first = self.fetch_fields(id, locator).await?;
        sleep_for(self.verify_delay).await;
        let second = self.fetch_fields(id, locator).await?;

        match first.first_difference(&second) {
            None => Ok(first),
            Some(field) => Err(StudyDeckError::FetchMismatch { field: field.to_string() }),
        }
    }

    /// Fetches `locator` until two consecutive fetches agree.
    ///
    /// # Errors
    ///
    /// [`StudyDeckError::RetriesExhausted`] once `max_attempts` attempts have
    /// failed; every fetch error, missing field or mismatch costs one attempt.
    pub async fn harvest(&self, id: &str, locator: &str) -> Result<RawItem> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            tracing::debug!(id, attempt, max_attempts, locator, "Fetching page");

            match self.fetch_verified(id, locator).await {
                Ok(item) => {
                    tracing::info!(id, attempt, "Page verified");
                    return Ok(item);
                }
                Err(err) => {
                    tracing::warn!(id, attempt, max_attempts, error = %err, "Harvest attempt failed");
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        sleep_for(self.policy.delay).await;
                    }
                }
            }
        }

        Err(StudyDeckError::RetriesExhausted {
            operation: format!("harvest {}", id),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Harvests every target in order, committing each verified page.
    ///
    /// Failures are recorded in the report and never stop the run.
    pub async fn harvest_all(&self, targets: &[HarvestTarget], checkpoints: &CheckpointDir) -> BatchReport {
        let mut report = BatchReport::default();

        for target in targets {
            if checkpoints.exists(&target.id) {
                tracing::debug!(id = %target.id, "Checkpoint exists, skipping");
                report.record(&target.id, ItemOutcome::Skipped);
                continue;
            }

            let committed = match self.harvest(&target.id, &target.locator).await {
                Ok(item) => checkpoints.write(&target.id, &item).map(|_| ()),
                Err(err) => Err(err),
            };

            let outcome = match committed {
                Ok(()) => ItemOutcome::Committed,
                Err(err) => {
                    tracing::warn!(id = %target.id, error = %err, "Giving up on page");
                    ItemOutcome::Failed(err.to_string())
                }
            };
            report.record(&target.id, outcome);
        }

        tracing::info!(
            committed = report.committed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Harvest finished"
        );
        report
    }
}

async fn sleep_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
