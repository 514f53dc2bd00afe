//! Runtime-tunable engine settings.
//!
//! Holds the validated tree of operational thresholds (channel timeouts,
//! retention cut-offs, circuit breaker tuning). Updates go through a
//! floor/range check per path and every accepted change is recorded in an
//! audit history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Delivery channel timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Email send timeout in milliseconds.
    pub email_timeout_ms: u64,
    /// Realtime push timeout in milliseconds.
    pub push_timeout_ms: u64,
}

/// Retention age thresholds, in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Low-priority messages expire after this many days.
    pub low_priority_days: i64,
    /// Medium-priority messages expire after this many days.
    pub medium_priority_days: i64,
    /// High-priority messages expire after this many days.
    pub high_priority_days: i64,
    /// Messages seen by every recipient expire after this many days.
    pub seen_age_days: i64,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures on a channel before work is queued.
    pub queue_threshold: u32,
    /// Consecutive failures on a channel before the circuit opens.
    pub open_threshold: u32,
    /// Cool-down before an open circuit admits traffic again, in seconds.
    pub cooldown_secs: u64,
}

/// The full settings tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsTree {
    /// Channel timeouts.
    pub channels: ChannelSettings,
    /// Retention thresholds.
    pub retention: RetentionSettings,
    /// Breaker tuning.
    pub breaker: BreakerSettings,
}

impl Default for SettingsTree {
    fn default() -> Self {
        Self {
            channels: ChannelSettings {
                email_timeout_ms: 10_000,
                push_timeout_ms: 2_000,
            },
            retention: RetentionSettings {
                low_priority_days: 90,
                medium_priority_days: 160,
                high_priority_days: 240,
                seen_age_days: 60,
            },
            breaker: BreakerSettings {
                queue_threshold: 3,
                open_threshold: 6,
                cooldown_secs: 300,
            },
        }
    }
}

/// One accepted settings update.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsUpdate {
    /// Dotted path that was updated.
    pub path: String,
    /// New value.
    pub value: i64,
    /// Operator-supplied reason.
    pub reason: String,
    /// When the update was applied.
    pub timestamp: DateTime<Utc>,
}

/// Result of validating the whole tree.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Whether every path passed its range check.
    pub valid: bool,
    /// Human-readable descriptions of each violation.
    pub errors: Vec<String>,
}

struct SettingsState {
    tree: SettingsTree,
    history: Vec<SettingsUpdate>,
}

/// Shared, validated runtime settings.
#[derive(Clone)]
pub struct RuntimeSettings {
    state: Arc<RwLock<SettingsState>>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::new()
    }
}

// Inclusive (min, max) bounds per dotted path. A value outside its bounds is
// rejected without touching the live tree.
const BOUNDS: &[(&str, i64, i64)] = &[
    ("channels.email_timeout_ms", 1_000, 120_000),
    ("channels.push_timeout_ms", 250, 30_000),
    ("retention.low_priority_days", 7, 3_650),
    ("retention.medium_priority_days", 7, 3_650),
    ("retention.high_priority_days", 7, 3_650),
    ("retention.seen_age_days", 7, 3_650),
    ("breaker.queue_threshold", 1, 100),
    ("breaker.open_threshold", 1, 1_000),
    ("breaker.cooldown_secs", 10, 86_400),
];

impl RuntimeSettings {
    /// Create settings with the default tree.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tree(SettingsTree::default())
    }

    /// Create settings from a specific tree (startup / tests).
    #[must_use]
    pub fn with_tree(tree: SettingsTree) -> Self {
        Self {
            state: Arc::new(RwLock::new(SettingsState {
                tree,
                history: Vec::new(),
            })),
        }
    }

    /// A point-in-time copy of the tree.
    pub async fn snapshot(&self) -> SettingsTree {
        self.state.read().await.tree.clone()
    }

    /// Update one path.
    ///
    /// Returns `true` and appends to the history when the value passes its
    /// range check; returns `false` (tree untouched) otherwise.
    pub async fn update(&self, path: &str, value: i64, reason: &str) -> bool {
        let Some(&(_, min, max)) = BOUNDS.iter().find(|(p, _, _)| *p == path) else {
            tracing::warn!(path, "Rejected settings update for unknown path");
            return false;
        };
        if value < min || value > max {
            tracing::warn!(path, value, min, max, "Rejected out-of-range settings update");
            return false;
        }

        let mut state = self.state.write().await;
        if !Self::apply(&mut state.tree, path, value) {
            return false;
        }
        state.history.push(SettingsUpdate {
            path: path.to_string(),
            value,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(path, value, reason, "Applied settings update");
        true
    }

    /// Validate the whole tree against the per-path bounds.
    pub async fn validate(&self) -> ValidationReport {
        let tree = self.snapshot().await;
        let mut errors = Vec::new();
        for &(path, min, max) in BOUNDS {
            let value = Self::read(&tree, path);
            if value < min || value > max {
                errors.push(format!("{path} = {value} outside [{min}, {max}]"));
            }
        }
        if tree.breaker.open_threshold <= tree.breaker.queue_threshold {
            errors.push(format!(
                "breaker.open_threshold = {} must exceed breaker.queue_threshold = {}",
                tree.breaker.open_threshold, tree.breaker.queue_threshold
            ));
        }
        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// The accepted-update audit history, oldest first.
    pub async fn history(&self) -> Vec<SettingsUpdate> {
        self.state.read().await.history.clone()
    }

    #[allow(clippy::cast_sign_loss)]
    fn apply(tree: &mut SettingsTree, path: &str, value: i64) -> bool {
        match path {
            "channels.email_timeout_ms" => tree.channels.email_timeout_ms = value as u64,
            "channels.push_timeout_ms" => tree.channels.push_timeout_ms = value as u64,
            "retention.low_priority_days" => tree.retention.low_priority_days = value,
            "retention.medium_priority_days" => tree.retention.medium_priority_days = value,
            "retention.high_priority_days" => tree.retention.high_priority_days = value,
            "retention.seen_age_days" => tree.retention.seen_age_days = value,
            "breaker.queue_threshold" => tree.breaker.queue_threshold = value as u32,
            "breaker.open_threshold" => tree.breaker.open_threshold = value as u32,
            "breaker.cooldown_secs" => tree.breaker.cooldown_secs = value as u64,
            _ => return false,
        }
        true
    }

    #[allow(clippy::cast_possible_wrap)]
    fn read(tree: &SettingsTree, path: &str) -> i64 {
        match path {
            "channels.email_timeout_ms" => tree.channels.email_timeout_ms as i64,
            "channels.push_timeout_ms" => tree.channels.push_timeout_ms as i64,
            "retention.low_priority_days" => tree.retention.low_priority_days,
            "retention.medium_priority_days" => tree.retention.medium_priority_days,
            "retention.high_priority_days" => tree.retention.high_priority_days,
            "retention.seen_age_days" => tree.retention.seen_age_days,
            "breaker.queue_threshold" => i64::from(tree.breaker.queue_threshold),
            "breaker.open_threshold" => i64::from(tree.breaker.open_threshold),
            "breaker.cooldown_secs" => tree.breaker.cooldown_secs as i64,
            _ => 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_accepts_in_range_value() {
        let settings = RuntimeSettings::new();
        assert!(
            settings
                .update("channels.email_timeout_ms", 15_000, "slow provider")
                .await
        );
        assert_eq!(settings.snapshot().await.channels.email_timeout_ms, 15_000);

        let history = settings.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].path, "channels.email_timeout_ms");
        assert_eq!(history[0].reason, "slow provider");
    }

    #[tokio::test]
    async fn test_update_rejects_below_floor() {
        let settings = RuntimeSettings::new();
        // An email timeout below the safety minimum must be rejected.
        assert!(
            !settings
                .update("channels.email_timeout_ms", 100, "too eager")
                .await
        );
        assert_eq!(settings.snapshot().await.channels.email_timeout_ms, 10_000);
        assert!(settings.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_path() {
        let settings = RuntimeSettings::new();
        assert!(!settings.update("channels.fax_timeout_ms", 5_000, "n/a").await);
        assert!(settings.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_validate_default_tree() {
        let settings = RuntimeSettings::new();
        let report = settings.validate().await;
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_validate_flags_inverted_breaker_thresholds() {
        let mut tree = SettingsTree::default();
        tree.breaker.queue_threshold = 10;
        tree.breaker.open_threshold = 5;
        let settings = RuntimeSettings::with_tree(tree);

        let report = settings.validate().await;
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }
}
