//! System message service.
//!
//! Read/delete state for one message is tracked per recipient in two views:
//! the system-messages list and the bell dropdown. Mutations here keep the
//! views consistent (reading in either view can mark both read) and publish
//! the matching realtime event plus a fresh unread snapshot.

use crate::services::event_publisher::{EventPublisher, EventPublisherService};
use atcloud_common::{AppError, AppResult, IdGenerator};
use atcloud_db::entities::system_message::{
    self, CreatorSnapshot, MessageType, Priority, RecipientMap, RecipientState,
};
use atcloud_db::repositories::{MessageStore, MessageStoreHandle};
use chrono::Utc;
use serde::Serialize;
use validator::Validate;

/// Unread counters for one recipient.
///
/// The two view counters are computed from disjoint flag checks; a message
/// unread in only one view counts once, in that view's counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounts {
    /// Unread in the bell dropdown.
    pub bell_notifications: u64,
    /// Unread in the system-messages view.
    pub system_messages: u64,
    /// Sum of the two view counters.
    pub total: u64,
}

/// Request to create a system message.
#[derive(Debug, Clone, Validate)]
pub struct CreateSystemMessageRequest {
    /// Message title.
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    /// Message body.
    #[validate(length(min = 1, message = "content is required"))]
    pub content: String,
    /// Message type.
    pub message_type: MessageType,
    /// Priority.
    pub priority: Priority,
    /// Denormalized creator snapshot.
    pub creator: Option<CreatorSnapshot>,
    /// Suppress the creator in client-facing reads.
    pub hide_creator: bool,
    /// Target recipient ids. Duplicates collapse to one state entry.
    pub recipients: Vec<String>,
    /// Optional expiry.
    pub expires_at: Option<chrono::DateTime<Utc>>,
    /// Producer-supplied metadata.
    pub metadata: Option<serde_json::Value>,
}

/// System message service for business logic.
#[derive(Clone)]
pub struct SystemMessageService {
    store: MessageStoreHandle,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl SystemMessageService {
    /// Create a new system message service.
    #[must_use]
    pub fn new(store: MessageStoreHandle) -> Self {
        Self {
            store,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Create a message with one all-false state entry per distinct
    /// recipient. Rejects missing title/content before any side effect.
    ///
    /// Delivery (realtime push, optional email) is the orchestrator's job;
    /// this only persists the record.
    pub async fn create(
        &self,
        request: CreateSystemMessageRequest,
    ) -> AppResult<system_message::Model> {
        request.validate()?;

        let recipients = RecipientMap::with_recipients(request.recipients);
        let target_user_id = if recipients.len() == 1 {
            recipients.iter().next().map(|(id, _)| id.clone())
        } else {
            None
        };

        let model = system_message::Model {
            id: self.id_gen.generate(),
            title: request.title,
            content: request.content,
            message_type: request.message_type,
            priority: request.priority,
            creator: request.creator,
            hide_creator: request.hide_creator,
            is_active: true,
            recipients,
            target_user_id,
            metadata: request.metadata,
            created_at: Utc::now().into(),
            expires_at: request.expires_at.map(Into::into),
        };

        self.store.insert(model).await
    }

    /// Mark read in the system view only. Idempotent.
    pub async fn mark_read_in_system(&self, id: &str, recipient_id: &str) -> AppResult<()> {
        let now = Utc::now();
        self.mutate_state(id, recipient_id, |state| state.mark_read_in_system(now))
            .await?;
        self.publish_read_events(id, recipient_id, true, false).await;
        Ok(())
    }

    /// Mark read in the bell view only. Idempotent.
    pub async fn mark_read_in_bell(&self, id: &str, recipient_id: &str) -> AppResult<()> {
        let now = Utc::now();
        self.mutate_state(id, recipient_id, |state| state.mark_read_in_bell(now))
            .await?;
        self.publish_read_events(id, recipient_id, false, true).await;
        Ok(())
    }

    /// Mark read in both views in one mutation. Used whenever a recipient
    /// reads the message from either view, so the other view reflects
    /// "read" without a second explicit action.
    pub async fn mark_read_everywhere(&self, id: &str, recipient_id: &str) -> AppResult<()> {
        let now = Utc::now();
        self.mutate_state(id, recipient_id, |state| state.mark_read_everywhere(now))
            .await?;
        self.publish_read_events(id, recipient_id, true, true).await;
        Ok(())
    }

    /// Hide the message from the recipient's system view. The record stays
    /// visible in their bell view unless independently removed, and persists
    /// for other recipients and cleanup accounting.
    pub async fn delete_from_system(&self, id: &str, recipient_id: &str) -> AppResult<()> {
        let now = Utc::now();
        self.mutate_state(id, recipient_id, |state| state.delete_from_system(now))
            .await?;

        if let Some(publisher) = &self.event_publisher {
            if let Err(e) = publisher.publish_message_deleted(recipient_id, id).await {
                tracing::warn!(error = %e, message_id = id, "Failed to publish message deleted event");
            }
        }
        self.publish_unread_snapshot(recipient_id).await;
        Ok(())
    }

    /// Hide the notification from the recipient's bell view. System view
    /// visibility is unaffected.
    pub async fn remove_from_bell(&self, id: &str, recipient_id: &str) -> AppResult<()> {
        let now = Utc::now();
        self.mutate_state(id, recipient_id, |state| state.remove_from_bell(now))
            .await?;

        if let Some(publisher) = &self.event_publisher {
            if let Err(e) = publisher.publish_notification_removed(recipient_id, id).await {
                tracing::warn!(error = %e, message_id = id, "Failed to publish notification removed event");
            }
        }
        self.publish_unread_snapshot(recipient_id).await;
        Ok(())
    }

    /// The stored state for one recipient. Absence of an entry means the
    /// recipient was never targeted and is a caller error.
    pub async fn get_recipient_state(
        &self,
        id: &str,
        recipient_id: &str,
    ) -> AppResult<RecipientState> {
        let model = self.load_active(id).await?;
        model
            .recipients
            .get(recipient_id)
            .cloned()
            .ok_or_else(|| AppError::RecipientNotTargeted {
                message: id.to_string(),
                recipient: recipient_id.to_string(),
            })
    }

    /// Unread counters for one recipient across all active messages.
    pub async fn unread_counts(&self, recipient_id: &str) -> AppResult<UnreadCounts> {
        let active = self.store.find_active().await?;

        let mut counts = UnreadCounts::default();
        for model in &active {
            let Some(state) = model.recipients.get(recipient_id) else {
                continue;
            };
            if state.unread_in_system() {
                counts.system_messages += 1;
            }
            if state.unread_in_bell() {
                counts.bell_notifications += 1;
            }
        }
        counts.total = counts.bell_notifications + counts.system_messages;
        Ok(counts)
    }

    /// Active messages visible in the recipient's system view, newest
    /// first, with the creator suppressed where `hide_creator` is set.
    pub async fn list_for_system_view(
        &self,
        recipient_id: &str,
    ) -> AppResult<Vec<system_message::Model>> {
        self.list_view(recipient_id, |state| !state.deleted_from_system)
            .await
    }

    /// Active notifications visible in the recipient's bell view, newest
    /// first, with the creator suppressed where `hide_creator` is set.
    pub async fn list_for_bell_view(
        &self,
        recipient_id: &str,
    ) -> AppResult<Vec<system_message::Model>> {
        self.list_view(recipient_id, |state| !state.removed_from_bell)
            .await
    }

    /// Mark every unread active message read everywhere for the recipient.
    /// Returns the number of messages touched.
    pub async fn mark_all_read(&self, recipient_id: &str) -> AppResult<u64> {
        let now = Utc::now();
        let active = self.store.find_active().await?;

        let mut touched = 0;
        for mut model in active {
            let Some(state) = model.recipients.get_mut(recipient_id) else {
                continue;
            };
            if state.read_in_system && state.read_in_bell {
                continue;
            }
            state.mark_read_everywhere(now);
            self.store.update(model).await?;
            touched += 1;
        }

        if touched > 0 {
            self.publish_unread_snapshot(recipient_id).await;
        }
        Ok(touched)
    }

    /// Administrative hard delete of one message, all recipients.
    pub async fn purge(&self, id: &str) -> AppResult<()> {
        let deleted = self.store.delete_many(&[id.to_string()]).await?;
        if deleted == 0 {
            return Err(AppError::MessageNotFound(id.to_string()));
        }
        tracing::info!(message_id = id, "Purged system message");
        Ok(())
    }

    // === internals ===

    async fn load_active(&self, id: &str) -> AppResult<system_message::Model> {
        let model = self.store.find_by_id(id).await?;
        match model {
            Some(m) if m.is_active => Ok(m),
            _ => Err(AppError::MessageNotFound(id.to_string())),
        }
    }

    async fn mutate_state<F>(&self, id: &str, recipient_id: &str, mutate: F) -> AppResult<()>
    where
        F: FnOnce(&mut RecipientState),
    {
        let mut model = self.load_active(id).await?;
        let Some(state) = model.recipients.get_mut(recipient_id) else {
            return Err(AppError::RecipientNotTargeted {
                message: id.to_string(),
                recipient: recipient_id.to_string(),
            });
        };
        mutate(state);
        self.store.update(model).await?;
        Ok(())
    }

    async fn list_view<F>(
        &self,
        recipient_id: &str,
        visible: F,
    ) -> AppResult<Vec<system_message::Model>>
    where
        F: Fn(&RecipientState) -> bool,
    {
        let active = self.store.find_active().await?;
        let mut visible_models: Vec<_> = active
            .into_iter()
            .filter(|m| m.recipients.get(recipient_id).is_some_and(&visible))
            .collect();
        for model in &mut visible_models {
            if model.hide_creator {
                model.creator = None;
            }
        }
        Ok(visible_models)
    }

    /// Read events are non-critical side effects: failures are logged and
    /// swallowed, never masking the committed state change.
    async fn publish_read_events(
        &self,
        id: &str,
        recipient_id: &str,
        system: bool,
        bell: bool,
    ) {
        if let Some(publisher) = &self.event_publisher {
            if system
                && let Err(e) = publisher.publish_message_read(recipient_id, id).await
            {
                tracing::warn!(error = %e, message_id = id, "Failed to publish message read event");
            }
            if bell
                && let Err(e) = publisher.publish_notification_read(recipient_id, id).await
            {
                tracing::warn!(error = %e, message_id = id, "Failed to publish notification read event");
            }
        }
        self.publish_unread_snapshot(recipient_id).await;
    }

    async fn publish_unread_snapshot(&self, recipient_id: &str) {
        let Some(publisher) = &self.event_publisher else {
            return;
        };
        match self.unread_counts(recipient_id).await {
            Ok(counts) => {
                if let Err(e) = publisher
                    .publish_unread_count_update(recipient_id, &counts)
                    .await
                {
                    tracing::warn!(error = %e, recipient_id, "Failed to publish unread count update");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, recipient_id, "Failed to recompute unread counts");
            }
        }
    }
}
