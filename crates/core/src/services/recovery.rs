//! Failure classification and recovery policy.
//!
//! Maps delivery failures to a recovery action. Repeated failures on the
//! same channel escalate retry -> queue -> circuit open; an open circuit
//! short-circuits further attempts until its cool-down elapses, after
//! which the channel's failure history resets.

use atcloud_common::{AppError, RuntimeSettings};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Failure category, derived from the typed error, never from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Timeout or temporary channel unavailability.
    ChannelTransient,
    /// Channel deemed unhealthy (circuit already open).
    ChannelSaturated,
    /// Persistence failure.
    Storage,
    /// Anything else.
    Unclassified,
}

impl ErrorCategory {
    /// Classify an application error.
    #[must_use]
    pub const fn classify(error: &AppError) -> Self {
        if error.is_storage() {
            Self::Storage
        } else if error.is_transient_channel() {
            Self::ChannelTransient
        } else if matches!(error, AppError::ChannelCircuitOpen { .. }) {
            Self::ChannelSaturated
        } else {
            Self::Unclassified
        }
    }
}

/// Recovery decision for one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry after the given backoff delay.
    RetryScheduled {
        /// Delay before the retry.
        delay: Duration,
    },
    /// Park the work on the retry queue.
    Queued,
    /// Short-circuit the channel until the cool-down elapses.
    CircuitOpen {
        /// When the circuit admits traffic again.
        until: DateTime<Utc>,
    },
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(1800),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for the given attempt number (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return self.max_delay;
        }

        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(delay_secs);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Failure context accompanying a classification request.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// Channel the failure occurred on ("email", "realtime", "storage").
    pub channel: String,
    /// Operation being attempted, for logs.
    pub operation: String,
}

/// Running failure statistics, process-lifetime.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    /// Total failures handled.
    pub total_errors: u64,
    /// Failures per category.
    pub by_category: HashMap<ErrorCategory, u64>,
    /// Circuits opened since start.
    pub circuits_opened: u64,
}

#[derive(Debug, Default)]
struct ChannelHealth {
    consecutive_failures: u32,
    circuit_open_until: Option<DateTime<Utc>>,
}

struct PolicyState {
    channels: HashMap<String, ChannelHealth>,
    stats: RecoveryStats,
}

/// Recovery policy with per-channel escalation.
#[derive(Clone)]
pub struct RecoveryPolicy {
    state: Arc<RwLock<PolicyState>>,
    settings: RuntimeSettings,
    retry: RetryConfig,
}

impl RecoveryPolicy {
    /// Create a new policy.
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            state: Arc::new(RwLock::new(PolicyState {
                channels: HashMap::new(),
                stats: RecoveryStats::default(),
            })),
            settings,
            retry: RetryConfig::default(),
        }
    }

    /// Decide how to recover from one failure.
    pub async fn handle_failure(
        &self,
        error: &AppError,
        context: &FailureContext,
    ) -> RecoveryAction {
        self.handle_failure_at(Utc::now(), error, context).await
    }

    async fn handle_failure_at(
        &self,
        now: DateTime<Utc>,
        error: &AppError,
        context: &FailureContext,
    ) -> RecoveryAction {
        let category = ErrorCategory::classify(error);
        let breaker = self.settings.snapshot().await.breaker;

        let mut state = self.state.write().await;
        state.stats.total_errors += 1;
        *state.stats.by_category.entry(category).or_insert(0) += 1;

        let health = state.channels.entry(context.channel.clone()).or_default();

        // An open circuit short-circuits everything on the channel.
        if let Some(until) = health.circuit_open_until {
            if now < until {
                tracing::debug!(
                    channel = %context.channel,
                    operation = %context.operation,
                    "Circuit open, short-circuiting"
                );
                return RecoveryAction::CircuitOpen { until };
            }
            // Cool-down elapsed: the failure history resets and the channel
            // gets a fresh escalation ladder.
            health.circuit_open_until = None;
            health.consecutive_failures = 0;
        }

        health.consecutive_failures += 1;
        let failures = health.consecutive_failures;

        if failures >= breaker.open_threshold {
            let cooldown = i64::try_from(breaker.cooldown_secs).unwrap_or(i64::MAX);
            let until = now + ChronoDuration::seconds(cooldown);
            health.circuit_open_until = Some(until);
            state.stats.circuits_opened += 1;
            tracing::warn!(
                channel = %context.channel,
                failures,
                cooldown_secs = breaker.cooldown_secs,
                "Circuit opened"
            );
            RecoveryAction::CircuitOpen { until }
        } else if failures >= breaker.queue_threshold {
            tracing::info!(
                channel = %context.channel,
                operation = %context.operation,
                failures,
                "Queueing failed work"
            );
            RecoveryAction::Queued
        } else {
            let delay = self.retry.delay_for_attempt(failures - 1);
            tracing::info!(
                channel = %context.channel,
                operation = %context.operation,
                failures,
                delay_secs = delay.as_secs(),
                "Scheduling retry"
            );
            RecoveryAction::RetryScheduled { delay }
        }
    }

    /// Whether the channel's circuit is currently open.
    pub async fn is_circuit_open(&self, channel: &str) -> bool {
        let state = self.state.read().await;
        state
            .channels
            .get(channel)
            .and_then(|h| h.circuit_open_until)
            .is_some_and(|until| Utc::now() < until)
    }

    /// Point-in-time statistics snapshot.
    pub async fn stats(&self) -> RecoveryStats {
        self.state.read().await.stats.clone()
    }

    /// Reset statistics and channel histories. Test/administrative action
    /// only; statistics are otherwise process-lifetime.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.channels.clear();
        state.stats = RecoveryStats::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use atcloud_common::SettingsTree;

    fn transient() -> AppError {
        AppError::ChannelTimeout {
            channel: "email".to_string(),
            timeout_ms: 1000,
        }
    }

    fn context() -> FailureContext {
        FailureContext {
            channel: "email".to_string(),
            operation: "send".to_string(),
        }
    }

    fn policy(queue_threshold: u32, open_threshold: u32) -> RecoveryPolicy {
        let mut tree = SettingsTree::default();
        tree.breaker.queue_threshold = queue_threshold;
        tree.breaker.open_threshold = open_threshold;
        RecoveryPolicy::new(RuntimeSettings::with_tree(tree))
    }

    #[test]
    fn test_classification_is_by_category() {
        assert_eq!(
            ErrorCategory::classify(&transient()),
            ErrorCategory::ChannelTransient
        );
        assert_eq!(
            ErrorCategory::classify(&AppError::ChannelCircuitOpen {
                channel: "email".to_string()
            }),
            ErrorCategory::ChannelSaturated
        );
        assert_eq!(
            ErrorCategory::classify(&AppError::Storage("insert failed".to_string())),
            ErrorCategory::Storage
        );
        assert_eq!(
            ErrorCategory::classify(&AppError::Internal("who knows".to_string())),
            ErrorCategory::Unclassified
        );
    }

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(120));
        // Capped at max_delay past max_retries.
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_escalation_retry_queue_circuit() {
        let policy = policy(2, 4);
        let err = transient();
        let ctx = context();

        // 1st failure: retry.
        assert!(matches!(
            policy.handle_failure(&err, &ctx).await,
            RecoveryAction::RetryScheduled { .. }
        ));
        // 2nd and 3rd: queued.
        assert_eq!(policy.handle_failure(&err, &ctx).await, RecoveryAction::Queued);
        assert_eq!(policy.handle_failure(&err, &ctx).await, RecoveryAction::Queued);
        // 4th: circuit opens.
        assert!(matches!(
            policy.handle_failure(&err, &ctx).await,
            RecoveryAction::CircuitOpen { .. }
        ));
        assert!(policy.is_circuit_open("email").await);

        // Further failures short-circuit while the cool-down runs.
        assert!(matches!(
            policy.handle_failure(&err, &ctx).await,
            RecoveryAction::CircuitOpen { .. }
        ));
    }

    #[tokio::test]
    async fn test_channels_escalate_independently() {
        let policy = policy(2, 4);
        let err = transient();

        let email = context();
        let realtime = FailureContext {
            channel: "realtime".to_string(),
            operation: "publish".to_string(),
        };

        policy.handle_failure(&err, &email).await;
        policy.handle_failure(&err, &email).await;

        // First failure on a different channel starts its own ladder.
        assert!(matches!(
            policy.handle_failure(&err, &realtime).await,
            RecoveryAction::RetryScheduled { .. }
        ));
    }

    #[tokio::test]
    async fn test_cooldown_expiry_resets_the_ladder() {
        let policy = policy(2, 3);
        let err = transient();
        let ctx = context();

        for _ in 0..3 {
            policy.handle_failure(&err, &ctx).await;
        }
        assert!(policy.is_circuit_open("email").await);

        // Simulate a failure arriving after the cool-down elapsed.
        let later = Utc::now() + ChronoDuration::seconds(3600);
        let action = policy.handle_failure_at(later, &err, &ctx).await;
        assert!(
            matches!(action, RecoveryAction::RetryScheduled { .. }),
            "fresh ladder after cool-down, got {action:?}"
        );
    }

    #[tokio::test]
    async fn test_stats_accumulate_and_reset() {
        let policy = policy(2, 4);
        policy.handle_failure(&transient(), &context()).await;
        policy
            .handle_failure(&AppError::Storage("down".to_string()), &context())
            .await;

        let stats = policy.stats().await;
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.by_category[&ErrorCategory::ChannelTransient], 1);
        assert_eq!(stats.by_category[&ErrorCategory::Storage], 1);

        policy.reset().await;
        let stats = policy.stats().await;
        assert_eq!(stats.total_errors, 0);
        assert!(stats.by_category.is_empty());
    }
}
