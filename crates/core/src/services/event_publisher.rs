//! Event publisher service.
//!
//! Provides an abstraction for publishing real-time events to a recipient's
//! live connections. The actual implementation is provided by the queue
//! crate (Redis Pub/Sub).

use crate::services::system_message::UnreadCounts;
use async_trait::async_trait;
use atcloud_common::AppResult;
use std::sync::Arc;

/// Trait for publishing real-time events.
///
/// Every publish targets one recipient's channel and is fire-and-forget:
/// implementations report transport errors but make no delivery guarantee.
/// The wire-level event names are the implementation's serialization tags
/// (`message_created`, `message_read`, `message_deleted`,
/// `notification_read`, `notification_removed`, `unread_count_update`).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a message created event.
    async fn publish_message_created(
        &self,
        recipient_id: &str,
        message_id: &str,
        title: &str,
        message_type: &str,
        priority: &str,
    ) -> AppResult<()>;

    /// Publish a system-view read event.
    async fn publish_message_read(&self, recipient_id: &str, message_id: &str) -> AppResult<()>;

    /// Publish a system-view delete event.
    async fn publish_message_deleted(&self, recipient_id: &str, message_id: &str) -> AppResult<()>;

    /// Publish a bell-view read event.
    async fn publish_notification_read(
        &self,
        recipient_id: &str,
        message_id: &str,
    ) -> AppResult<()>;

    /// Publish a bell-view removal event.
    async fn publish_notification_removed(
        &self,
        recipient_id: &str,
        message_id: &str,
    ) -> AppResult<()>;

    /// Publish a recomputed unread-count snapshot.
    async fn publish_unread_count_update(
        &self,
        recipient_id: &str,
        counts: &UnreadCounts,
    ) -> AppResult<()>;
}

/// A no-op implementation of `EventPublisher` for testing or when real-time
/// events are disabled.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_message_created(
        &self,
        _recipient_id: &str,
        _message_id: &str,
        _title: &str,
        _message_type: &str,
        _priority: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_message_read(&self, _recipient_id: &str, _message_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn publish_message_deleted(
        &self,
        _recipient_id: &str,
        _message_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_notification_read(
        &self,
        _recipient_id: &str,
        _message_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_notification_removed(
        &self,
        _recipient_id: &str,
        _message_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_unread_count_update(
        &self,
        _recipient_id: &str,
        _counts: &UnreadCounts,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Wrapper for boxed `EventPublisher` trait object.
pub type EventPublisherService = Arc<dyn EventPublisher>;
