//! Trio delivery orchestrator.
//!
//! Composes optional email + mandatory persisted record + realtime push
//! into one logical operation. Stages run in a fixed order (email, record,
//! pushes); each completed stage registers a compensating rollback step,
//! and a later failure unwinds the registered steps in reverse order.
//!
//! A realtime push failure fails the whole delivery, rolling back the
//! persisted record even though the email and record stages succeeded.
//! That strict policy is deliberate and load-bearing for callers that treat
//! "delivered" as all-channels-or-nothing.

use crate::services::email::{
    EmailChannel, EmailChannelHandle, EmailDeliveryResult, EmailMessage, EmailPriority,
};
use crate::services::event_publisher::{EventPublisher, EventPublisherService};
use crate::services::identity::{IdentityResolver, IdentityResolverService};
use crate::services::system_message::{CreateSystemMessageRequest, SystemMessageService};
use atcloud_common::{AppError, AppResult, IdGenerator, RuntimeSettings};
use atcloud_db::entities::system_message::{CreatorSnapshot, MessageType, Priority};
use atcloud_db::repositories::{MessageStore, MessageStoreHandle};
use serde::Serialize;
use std::time::{Duration, Instant};
use validator::Validate;

/// How a side-effect failure affects the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSeverity {
    /// Aborts the delivery and triggers rollback when enabled.
    Fatal,
    /// Logged and swallowed; never masks the primary result.
    NonCritical,
}

fn observe_failure(severity: FailureSeverity, stage: &str, error: &AppError) {
    match severity {
        FailureSeverity::Fatal => {
            tracing::error!(stage, error = %error, "Delivery stage failed");
        }
        FailureSeverity::NonCritical => {
            tracing::warn!(stage, error = %error, "Non-critical side effect failed");
        }
    }
}

/// Email portion of a delivery request.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    /// Recipient address. Empty means "resolve from the first recipient".
    pub to: String,
    /// Template name.
    pub template: String,
    /// Template data payload.
    pub data: serde_json::Value,
    /// Send priority.
    pub priority: EmailPriority,
}

/// One delivery request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Optional email stage.
    pub email: Option<EmailRequest>,
    /// Message title.
    pub title: String,
    /// Message body.
    pub content: String,
    /// Message type.
    pub message_type: MessageType,
    /// Message priority.
    pub priority: Priority,
    /// Suppress the creator in client-facing reads.
    pub hide_creator: bool,
    /// Target recipient ids.
    pub recipients: Vec<String>,
    /// Denormalized creator snapshot.
    pub creator: Option<CreatorSnapshot>,
    /// Unwind completed stages when a later stage fails.
    pub enable_rollback: bool,
}

/// Delivery run metrics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetrics {
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// Outcome of one delivery run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    /// Whether every stage completed.
    pub success: bool,
    /// Provider message id of the sent email, if any.
    pub email_id: Option<String>,
    /// Id of the persisted message. `None` when the run failed (a rolled
    /// back record does not exist for the caller's bookkeeping).
    pub message_id: Option<String>,
    /// Completed pushes. Always 0 for a failed run, even if some pushes
    /// landed before the aborting failure: the record they pointed at was
    /// rolled back.
    pub notifications_sent: usize,
    /// Human-readable failure description.
    pub error: Option<String>,
    /// Whether the rollback pass ran to completion.
    pub rollback_completed: bool,
    /// Run metrics.
    pub metrics: DeliveryMetrics,
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Stages still executing.
    Pending,
    /// Every stage completed.
    Committed,
    /// Rollback pass executed.
    RolledBack,
}

/// One reversible operation registered by a completed stage.
#[derive(Debug, Clone)]
enum RollbackStep {
    /// Sent email cannot be unsent; logged for audit on rollback.
    EmailAudit { email_id: Option<String> },
    /// Delete the persisted message.
    DeleteMessage { message_id: String },
}

/// Orchestrator-internal pseudo-transaction. Created per delivery request,
/// discarded after completion. Not persisted.
struct Transaction {
    id: String,
    status: TransactionStatus,
    steps: Vec<RollbackStep>,
    started: Instant,
}

impl Transaction {
    fn new(id: String) -> Self {
        Self {
            id,
            status: TransactionStatus::Pending,
            steps: Vec::new(),
            started: Instant::now(),
        }
    }

    fn push(&mut self, step: RollbackStep) {
        self.steps.push(step);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn commit(&mut self) -> DeliveryMetrics {
        self.status = TransactionStatus::Committed;
        DeliveryMetrics {
            duration_ms: self.duration_ms(),
        }
    }
}

/// Trio delivery orchestrator.
#[derive(Clone)]
pub struct DeliveryOrchestrator {
    store: MessageStoreHandle,
    messages: SystemMessageService,
    publisher: EventPublisherService,
    email: EmailChannelHandle,
    identity: IdentityResolverService,
    settings: RuntimeSettings,
    id_gen: IdGenerator,
}

impl DeliveryOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        store: MessageStoreHandle,
        messages: SystemMessageService,
        publisher: EventPublisherService,
        email: EmailChannelHandle,
        identity: IdentityResolverService,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            store,
            messages,
            publisher,
            email,
            identity,
            settings,
            id_gen: IdGenerator::new(),
        }
    }

    /// Run one delivery.
    ///
    /// Validation errors surface as `Err` before any side effect; every
    /// other failure returns a structured outcome with `success: false`.
    pub async fn deliver(&self, request: DeliveryRequest) -> AppResult<DeliveryOutcome> {
        let create_request = CreateSystemMessageRequest {
            title: request.title.clone(),
            content: request.content.clone(),
            message_type: request.message_type.clone(),
            priority: request.priority,
            creator: request.creator.clone(),
            hide_creator: request.hide_creator,
            recipients: request.recipients.clone(),
            expires_at: None,
            metadata: None,
        };
        create_request.validate()?;

        let email_to = match &request.email {
            Some(email_request) => Some(self.resolve_email_address(email_request, &request).await?),
            None => None,
        };

        let settings = self.settings.snapshot().await;
        let mut tx = Transaction::new(self.id_gen.generate_uuid_v4());
        tracing::debug!(
            transaction_id = %tx.id,
            recipients = request.recipients.len(),
            "Starting trio delivery"
        );

        // Stage 1: email (optional, timeout-guarded).
        let mut email_id = None;
        if let (Some(email_request), Some(to)) = (&request.email, email_to) {
            match self
                .send_email_guarded(email_request, to, settings.channels.email_timeout_ms)
                .await
            {
                Ok(result) => {
                    email_id = result.message_id;
                    tx.push(RollbackStep::EmailAudit {
                        email_id: email_id.clone(),
                    });
                }
                Err(error) => {
                    if request.enable_rollback {
                        // Abort before any record exists.
                        observe_failure(FailureSeverity::Fatal, "email", &error);
                        self.run_rollback(&mut tx).await;
                        return Ok(Self::failure(&error, true, &tx));
                    }
                    observe_failure(FailureSeverity::NonCritical, "email", &error);
                }
            }
        }

        // Stage 2: persisted record. Storage failures always abort.
        let model = match self.messages.create(create_request).await {
            Ok(model) => model,
            Err(error) => {
                observe_failure(FailureSeverity::Fatal, "record", &error);
                let rollback_completed = if request.enable_rollback {
                    self.run_rollback(&mut tx).await;
                    true
                } else {
                    false
                };
                return Ok(Self::failure(&error, rollback_completed, &tx));
            }
        };
        tx.push(RollbackStep::DeleteMessage {
            message_id: model.id.clone(),
        });

        // Stage 3: realtime push per recipient. Any push failure is fatal
        // to the whole delivery.
        let mut sent = 0;
        let recipient_ids: Vec<String> = model.recipients.iter().map(|(id, _)| id.clone()).collect();
        for recipient_id in &recipient_ids {
            if let Err(error) = self
                .push_to_recipient(recipient_id, &model.id, &request, settings.channels.push_timeout_ms)
                .await
            {
                observe_failure(FailureSeverity::Fatal, "push", &error);
                let rollback_completed = if request.enable_rollback {
                    self.run_rollback(&mut tx).await;
                    true
                } else {
                    false
                };
                // Pushes that landed before the failure pointed at a record
                // that no longer exists; the outcome reports zero sent.
                return Ok(Self::failure(&error, rollback_completed, &tx));
            }
            sent += 1;
        }

        let metrics = tx.commit();
        tracing::info!(
            transaction_id = %tx.id,
            message_id = %model.id,
            notifications_sent = sent,
            duration_ms = metrics.duration_ms,
            "Trio delivery committed"
        );

        Ok(DeliveryOutcome {
            success: true,
            email_id,
            message_id: Some(model.id),
            notifications_sent: sent,
            error: None,
            rollback_completed: false,
            metrics,
        })
    }

    // === stages ===

    async fn resolve_email_address(
        &self,
        email_request: &EmailRequest,
        request: &DeliveryRequest,
    ) -> AppResult<String> {
        if !email_request.to.is_empty() {
            return Ok(email_request.to.clone());
        }
        let first_recipient = request.recipients.first().ok_or_else(|| {
            AppError::Validation("email requested but no recipients given".to_string())
        })?;
        let profile = self.identity.resolve(first_recipient).await?;
        profile.and_then(|p| p.email).ok_or_else(|| {
            AppError::Validation(format!("no email address known for {first_recipient}"))
        })
    }

    /// Race the email send against a deadline. The loser of the race keeps
    /// running detached so its eventual outcome still reaches the logs.
    async fn send_email_guarded(
        &self,
        email_request: &EmailRequest,
        to: String,
        timeout_ms: u64,
    ) -> AppResult<EmailDeliveryResult> {
        let message = EmailMessage {
            to,
            template: email_request.template.clone(),
            data: email_request.data.clone(),
            priority: email_request.priority,
        };

        let channel = self.email.clone();
        let mut handle = tokio::spawn(async move { channel.send(message).await });

        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await
        {
            Ok(joined) => {
                joined.map_err(|e| AppError::Internal(format!("email task failed: {e}")))??
            }
            Err(_) => {
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(result)) => tracing::warn!(
                            success = result.success,
                            "Email send completed after the timeout had fired"
                        ),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Email send failed after the timeout had fired");
                        }
                        Err(e) => tracing::warn!(error = %e, "Email task aborted after timeout"),
                    }
                });
                return Err(AppError::ChannelTimeout {
                    channel: "email".to_string(),
                    timeout_ms,
                });
            }
        };

        if result.success {
            Ok(result)
        } else {
            Err(AppError::ChannelUnavailable {
                channel: "email".to_string(),
                reason: result
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            })
        }
    }

    async fn push_to_recipient(
        &self,
        recipient_id: &str,
        message_id: &str,
        request: &DeliveryRequest,
        timeout_ms: u64,
    ) -> AppResult<()> {
        let push = async {
            self.publisher
                .publish_message_created(
                    recipient_id,
                    message_id,
                    &request.title,
                    message_type_str(&request.message_type),
                    priority_str(request.priority),
                )
                .await?;

            let counts = self.messages.unread_counts(recipient_id).await?;
            self.publisher
                .publish_unread_count_update(recipient_id, &counts)
                .await
        };

        tokio::time::timeout(Duration::from_millis(timeout_ms), push)
            .await
            .map_err(|_| AppError::ChannelTimeout {
                channel: "realtime".to_string(),
                timeout_ms,
            })?
    }

    /// Execute registered rollback steps in reverse order. Step failures
    /// are logged, never raised.
    async fn run_rollback(&self, tx: &mut Transaction) {
        for step in tx.steps.iter().rev() {
            match step {
                RollbackStep::DeleteMessage { message_id } => {
                    match self.store.delete_many(std::slice::from_ref(message_id)).await {
                        Ok(_) => {
                            tracing::info!(transaction_id = %tx.id, message_id, "Rolled back message record");
                        }
                        Err(error) => {
                            observe_failure(
                                FailureSeverity::NonCritical,
                                "rollback_delete_message",
                                &error,
                            );
                        }
                    }
                }
                RollbackStep::EmailAudit { email_id } => {
                    tracing::info!(
                        transaction_id = %tx.id,
                        email_id = email_id.as_deref().unwrap_or("unknown"),
                        "Rollback audit: sent email cannot be unsent"
                    );
                }
            }
        }
        tx.status = TransactionStatus::RolledBack;
        tracing::debug!(
            transaction_id = %tx.id,
            status = ?tx.status,
            steps = tx.steps.len(),
            "Rollback pass finished"
        );
    }

    fn failure(error: &AppError, rollback_completed: bool, tx: &Transaction) -> DeliveryOutcome {
        DeliveryOutcome {
            success: false,
            email_id: None,
            message_id: None,
            notifications_sent: 0,
            error: Some(error.to_string()),
            rollback_completed,
            metrics: DeliveryMetrics {
                duration_ms: tx.duration_ms(),
            },
        }
    }
}

const fn message_type_str(message_type: &MessageType) -> &'static str {
    match message_type {
        MessageType::Announcement => "announcement",
        MessageType::Update => "update",
        MessageType::Assignment => "assignment",
        MessageType::Reminder => "reminder",
        MessageType::AuthLevelChange => "auth_level_change",
        MessageType::AtcloudRoleChange => "atcloud_role_change",
        MessageType::AdminNotification => "admin_notification",
        MessageType::UserManagement => "user_management",
    }
}

const fn priority_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::email::EmailChannel;
    use crate::services::event_publisher::EventPublisher;
    use crate::services::identity::NoOpIdentityResolver;
    use crate::services::system_message::UnreadCounts;
    use async_trait::async_trait;
    use atcloud_db::repositories::MessageStore;
    use atcloud_db::test_utils::InMemoryMessageStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockEmailChannel {
        fail: AtomicBool,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl EmailChannel for MockEmailChannel {
        async fn send(&self, _message: EmailMessage) -> AppResult<EmailDeliveryResult> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::ChannelUnavailable {
                    channel: "email".to_string(),
                    reason: "smtp refused".to_string(),
                });
            }
            Ok(EmailDeliveryResult {
                success: true,
                message_id: Some("email-1".to_string()),
                error: None,
            })
        }
    }

    #[derive(Default)]
    struct MockPublisher {
        fail_created: AtomicBool,
        created: AtomicUsize,
        count_updates: AtomicUsize,
    }

    #[async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish_message_created(
            &self,
            _recipient_id: &str,
            _message_id: &str,
            _title: &str,
            _message_type: &str,
            _priority: &str,
        ) -> AppResult<()> {
            if self.fail_created.load(Ordering::SeqCst) {
                return Err(AppError::ChannelUnavailable {
                    channel: "realtime".to_string(),
                    reason: "socket gone".to_string(),
                });
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn publish_message_read(&self, _r: &str, _m: &str) -> AppResult<()> {
            Ok(())
        }

        async fn publish_message_deleted(&self, _r: &str, _m: &str) -> AppResult<()> {
            Ok(())
        }

        async fn publish_notification_read(&self, _r: &str, _m: &str) -> AppResult<()> {
            Ok(())
        }

        async fn publish_notification_removed(&self, _r: &str, _m: &str) -> AppResult<()> {
            Ok(())
        }

        async fn publish_unread_count_update(
            &self,
            _recipient_id: &str,
            _counts: &UnreadCounts,
        ) -> AppResult<()> {
            self.count_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        orchestrator: DeliveryOrchestrator,
        store: Arc<InMemoryMessageStore>,
        email: Arc<MockEmailChannel>,
        publisher: Arc<MockPublisher>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryMessageStore::new());
        let email = Arc::new(MockEmailChannel::default());
        let publisher = Arc::new(MockPublisher::default());
        let messages = SystemMessageService::new(store.clone());
        let orchestrator = DeliveryOrchestrator::new(
            store.clone(),
            messages,
            publisher.clone(),
            email.clone(),
            Arc::new(NoOpIdentityResolver),
            RuntimeSettings::new(),
        );
        Harness {
            orchestrator,
            store,
            email,
            publisher,
        }
    }

    fn request(with_email: bool, recipients: &[&str], enable_rollback: bool) -> DeliveryRequest {
        DeliveryRequest {
            email: with_email.then(|| EmailRequest {
                to: "leader@example.com".to_string(),
                template: "assignment".to_string(),
                data: serde_json::json!({"body": "You are on duty Sunday."}),
                priority: EmailPriority::High,
            }),
            title: "New assignment".to_string(),
            content: "You have been assigned as greeter.".to_string(),
            message_type: MessageType::Assignment,
            priority: Priority::High,
            hide_creator: false,
            recipients: recipients.iter().map(ToString::to_string).collect(),
            creator: None,
            enable_rollback,
        }
    }

    #[tokio::test]
    async fn test_full_trio_success() {
        let h = harness();
        let outcome = h
            .orchestrator
            .deliver(request(true, &["u1", "u2", "u3"], true))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.email_id.as_deref(), Some("email-1"));
        assert_eq!(outcome.notifications_sent, 3);
        assert!(!outcome.rollback_completed);
        assert!(outcome.error.is_none());

        let message_id = outcome.message_id.unwrap();
        let stored = h.store.find_by_id(&message_id).await.unwrap().unwrap();
        assert_eq!(stored.recipients.len(), 3);
        assert_eq!(h.publisher.created.load(Ordering::SeqCst), 3);
        assert_eq!(h.publisher.count_updates.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_email_failure_with_rollback_leaves_no_record() {
        let h = harness();
        h.email.fail.store(true, Ordering::SeqCst);

        let outcome = h
            .orchestrator
            .deliver(request(true, &["u1", "u2"], true))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.rollback_completed);
        assert_eq!(outcome.notifications_sent, 0);
        assert!(outcome.message_id.is_none());
        assert!(h.store.is_empty().await, "no record exists for the request");
        assert_eq!(h.publisher.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_email_failure_without_rollback_continues() {
        let h = harness();
        h.email.fail.store(true, Ordering::SeqCst);

        let outcome = h
            .orchestrator
            .deliver(request(true, &["u1"], false))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.email_id.is_none());
        assert_eq!(outcome.notifications_sent, 1);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_push_failure_rolls_back_persisted_record() {
        let h = harness();
        h.publisher.fail_created.store(true, Ordering::SeqCst);

        let outcome = h
            .orchestrator
            .deliver(request(true, &["u1", "u2"], true))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.rollback_completed);
        // Failed runs report zero sent pushes for the caller's bookkeeping.
        assert_eq!(outcome.notifications_sent, 0);
        assert!(h.store.is_empty().await, "record was rolled back");
    }

    #[tokio::test]
    async fn test_push_failure_without_rollback_keeps_record() {
        let h = harness();
        h.publisher.fail_created.store(true, Ordering::SeqCst);

        let outcome = h
            .orchestrator
            .deliver(request(false, &["u1"], false))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.rollback_completed);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_and_rolls_back() {
        let h = harness();
        h.store.fail_inserts(true);

        let outcome = h
            .orchestrator
            .deliver(request(true, &["u1"], true))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.rollback_completed);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("Storage"));
        assert_eq!(h.publisher.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_error_precedes_all_side_effects() {
        let h = harness();
        let mut bad = request(true, &["u1"], true);
        bad.title = String::new();

        let err = h.orchestrator.deliver(bad).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(h.email.sends.load(Ordering::SeqCst), 0, "no email attempted");
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_recipients_collapse_before_push() {
        let h = harness();
        let outcome = h
            .orchestrator
            .deliver(request(false, &["u1", "u1", "u2"], true))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.notifications_sent, 2);
        assert_eq!(h.publisher.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_email_address_without_resolver_is_rejected() {
        let h = harness();
        let mut req = request(true, &["u1"], true);
        req.email.as_mut().unwrap().to = String::new();

        let err = h.orchestrator.deliver(req).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(h.store.is_empty().await);
    }
}
