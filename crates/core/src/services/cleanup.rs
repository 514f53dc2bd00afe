//! Retention cleanup engine.
//!
//! Scans active messages, applies the ordered retention rules, and deletes
//! eligible records in one batch. Runs lock-free: every eligibility
//! condition (age, terminal per-recipient state) is permanently true once
//! satisfied, so a record turning eligible mid-scan is simply picked up on
//! the next run.

use atcloud_common::{AppError, AppResult, RetentionSettings, RuntimeSettings};
use atcloud_db::entities::system_message::{self, Priority, RecipientState};
use atcloud_db::repositories::{MessageStore, MessageStoreHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Why a record was deleted. First matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    /// Every recipient deleted or removed the message.
    AllDismissed,
    /// Low priority past its age threshold.
    LowPriorityExpired,
    /// Medium priority past its age threshold.
    MediumPriorityExpired,
    /// High priority past its age threshold.
    HighPriorityExpired,
    /// Aged past the seen threshold with every recipient having seen it.
    SeenAndAged,
}

/// Per-reason deletion counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionsByReason {
    /// Rule 1 deletions.
    pub all_dismissed: u64,
    /// Rule 2 deletions.
    pub low_priority_expired: u64,
    /// Rule 3 deletions.
    pub medium_priority_expired: u64,
    /// Rule 4 deletions.
    pub high_priority_expired: u64,
    /// Rule 5 deletions.
    pub seen_and_aged: u64,
}

impl DeletionsByReason {
    fn record(&mut self, reason: DeletionReason) {
        match reason {
            DeletionReason::AllDismissed => self.all_dismissed += 1,
            DeletionReason::LowPriorityExpired => self.low_priority_expired += 1,
            DeletionReason::MediumPriorityExpired => self.medium_priority_expired += 1,
            DeletionReason::HighPriorityExpired => self.high_priority_expired += 1,
            DeletionReason::SeenAndAged => self.seen_and_aged += 1,
        }
    }
}

/// Statistics for one cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Records deleted in the final batch.
    pub deleted_count: u64,
    /// Active records examined.
    pub scanned_count: u64,
    /// Deletions attributed per rule.
    pub deletions_by_reason: DeletionsByReason,
    /// Wall-clock duration of the run.
    pub execution_time_ms: u64,
}

/// A failed cleanup run. Carries the elapsed time so the caller still
/// learns how long the attempt ran before the error is re-raised.
#[derive(Debug)]
pub struct CleanupFailure {
    /// The underlying error.
    pub error: AppError,
    /// Wall-clock duration of the failed attempt.
    pub execution_time_ms: u64,
}

impl std::fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cleanup failed after {}ms: {}",
            self.execution_time_ms, self.error
        )
    }
}

impl std::error::Error for CleanupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Decide whether a record is eligible for deletion, first-match-wins.
///
/// Records targeting nobody are never eligible.
#[must_use]
pub fn deletion_reason(
    model: &system_message::Model,
    now: DateTime<Utc>,
    retention: &RetentionSettings,
) -> Option<DeletionReason> {
    if model.recipients.is_empty() {
        return None;
    }

    // Rule 1: dismissed from at least one view by everyone.
    if model.recipients.all_recipients(RecipientState::is_dismissed) {
        return Some(DeletionReason::AllDismissed);
    }

    // Rules 2-4: priority age thresholds.
    let age = model.age_days(now);
    match model.priority {
        Priority::Low if age > retention.low_priority_days => {
            return Some(DeletionReason::LowPriorityExpired);
        }
        Priority::Medium if age > retention.medium_priority_days => {
            return Some(DeletionReason::MediumPriorityExpired);
        }
        Priority::High if age > retention.high_priority_days => {
            return Some(DeletionReason::HighPriorityExpired);
        }
        _ => {}
    }

    // Rule 5: old enough and seen (read or dismissed) by everyone.
    if age > retention.seen_age_days && model.recipients.all_recipients(RecipientState::is_seen) {
        return Some(DeletionReason::SeenAndAged);
    }

    None
}

/// Retention cleanup engine.
#[derive(Clone)]
pub struct RetentionCleanupEngine {
    store: MessageStoreHandle,
    settings: RuntimeSettings,
}

impl RetentionCleanupEngine {
    /// Create a new cleanup engine.
    #[must_use]
    pub const fn new(store: MessageStoreHandle, settings: RuntimeSettings) -> Self {
        Self { store, settings }
    }

    /// Run one cleanup pass.
    ///
    /// Eligible ids are collected during the scan and deleted in a single
    /// batch at the end, minimizing store round-trips.
    pub async fn execute_cleanup(&self) -> Result<CleanupReport, CleanupFailure> {
        let started = Instant::now();
        match self.run(started).await {
            Ok(report) => {
                tracing::info!(
                    deleted = report.deleted_count,
                    scanned = report.scanned_count,
                    duration_ms = report.execution_time_ms,
                    "Retention cleanup completed"
                );
                Ok(report)
            }
            Err(error) => {
                let execution_time_ms = elapsed_ms(started);
                tracing::error!(
                    error = %error,
                    duration_ms = execution_time_ms,
                    "Retention cleanup failed"
                );
                Err(CleanupFailure {
                    error,
                    execution_time_ms,
                })
            }
        }
    }

    async fn run(&self, started: Instant) -> AppResult<CleanupReport> {
        let retention = self.settings.snapshot().await.retention;
        let now = Utc::now();

        let records = self.store.find_active().await?;

        let mut report = CleanupReport {
            scanned_count: records.len() as u64,
            ..CleanupReport::default()
        };
        let mut eligible = Vec::new();

        for model in &records {
            if let Some(reason) = deletion_reason(model, now, &retention) {
                report.deletions_by_reason.record(reason);
                eligible.push(model.id.clone());
            }
        }

        report.deleted_count = self.store.delete_many(&eligible).await?;
        report.execution_time_ms = elapsed_ms(started);
        Ok(report)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
