//! Redis Pub/Sub for realtime event distribution.
//!
//! Carries per-recipient notification events across server instances. Each
//! recipient has one channel; a local broadcast rebroadcasts incoming
//! events to in-process subscribers (websocket/SSE fan-out).

#![allow(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use atcloud_common::AppResult;
use atcloud_core::services::system_message::UnreadCounts;
use atcloud_core::services::EventPublisher;
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pub/Sub channel names.
pub mod channels {
    /// Recipient-specific events (prefix + recipient id).
    pub const USER_PREFIX: &str = ":user:";

    /// Channel for one recipient.
    #[must_use]
    pub fn user_channel(prefix: &str, recipient_id: &str) -> String {
        format!("{prefix}{USER_PREFIX}{recipient_id}")
    }

    /// Pattern matching every recipient channel under the prefix.
    #[must_use]
    pub fn user_pattern(prefix: &str) -> String {
        format!("{prefix}{USER_PREFIX}*")
    }
}

/// Pub/Sub event types. The serde tag is the wire-level event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PubSubEvent {
    /// A message was delivered to the recipient.
    MessageCreated {
        message_id: String,
        recipient_id: String,
        title: String,
        message_type: String,
        priority: String,
    },
    /// Read in the system view.
    MessageRead {
        message_id: String,
        recipient_id: String,
    },
    /// Deleted from the system view.
    MessageDeleted {
        message_id: String,
        recipient_id: String,
    },
    /// Read in the bell view.
    NotificationRead {
        message_id: String,
        recipient_id: String,
    },
    /// Removed from the bell view.
    NotificationRemoved {
        message_id: String,
        recipient_id: String,
    },
    /// Recomputed unread counters for the recipient.
    UnreadCountUpdate {
        recipient_id: String,
        bell_notifications: u64,
        system_messages: u64,
        total: u64,
    },
}

/// In-process rebroadcast of events received from Redis.
///
/// This is the fan-out seam the transport layer (websocket/SSE handlers,
/// out of scope here) hooks into via [`LocalBroadcast::subscribe`].
#[derive(Clone)]
pub struct LocalBroadcast {
    tx: broadcast::Sender<PubSubEvent>,
}

impl LocalBroadcast {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get a receiver for rebroadcast events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PubSubEvent> {
        self.tx.subscribe()
    }

    /// Number of attached local subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Parse one raw payload from Redis and rebroadcast it locally.
    /// Unparseable payloads are logged and dropped.
    fn dispatch(&self, payload: &str) {
        match serde_json::from_str::<PubSubEvent>(payload) {
            Ok(event) => {
                debug!(?event, "Received Pub/Sub event");
                if self.tx.send(event).is_err() {
                    debug!("No local subscribers for Pub/Sub event");
                }
            }
            Err(e) => {
                warn!("Failed to parse Pub/Sub message: {}", e);
            }
        }
    }
}

/// Redis Pub/Sub manager for event distribution.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    subscriber: SubscriberClient,
    prefix: String,
    local: LocalBroadcast,
}

impl RedisPubSub {
    /// Create a new Redis Pub/Sub manager.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        info!("Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            subscriber,
            prefix: prefix.to_string(),
            local: LocalBroadcast::new(1000),
        })
    }

    /// Subscribe to every recipient channel and start the event loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        self.subscriber
            .psubscribe(channels::user_pattern(&self.prefix))
            .await?;

        info!("Subscribed to recipient Pub/Sub channels");

        // Spawn event loop
        let local = self.local.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                if let Some(payload) = message.value.as_string() {
                    local.dispatch(&payload);
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish an event to one recipient's channel.
    pub async fn publish(&self, recipient_id: &str, event: &PubSubEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let channel = channels::user_channel(&self.prefix, recipient_id);
        let _: () = self.publisher.publish(channel, payload).await?;
        debug!(recipient_id, ?event, "Published Pub/Sub event");
        Ok(())
    }

    /// Get a receiver for local broadcast events.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<PubSubEvent> {
        self.local.subscribe()
    }

    /// Get the number of local subscribers.
    #[must_use]
    pub fn local_subscriber_count(&self) -> usize {
        self.local.receiver_count()
    }

    /// Shutdown the Pub/Sub manager.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shutdown");
        Ok(())
    }
}

/// Implementation of `EventPublisher` for `RedisPubSub`.
/// This allows core services to publish events without depending on the
/// queue crate directly.
#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish_message_created(
        &self,
        recipient_id: &str,
        message_id: &str,
        title: &str,
        message_type: &str,
        priority: &str,
    ) -> AppResult<()> {
        let event = PubSubEvent::MessageCreated {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
            title: title.to_string(),
            message_type: message_type.to_string(),
            priority: priority.to_string(),
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish_message_read(&self, recipient_id: &str, message_id: &str) -> AppResult<()> {
        let event = PubSubEvent::MessageRead {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish_message_deleted(&self, recipient_id: &str, message_id: &str) -> AppResult<()> {
        let event = PubSubEvent::MessageDeleted {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish_notification_read(
        &self,
        recipient_id: &str,
        message_id: &str,
    ) -> AppResult<()> {
        let event = PubSubEvent::NotificationRead {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish_notification_removed(
        &self,
        recipient_id: &str,
        message_id: &str,
    ) -> AppResult<()> {
        let event = PubSubEvent::NotificationRemoved {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish_unread_count_update(
        &self,
        recipient_id: &str,
        counts: &UnreadCounts,
    ) -> AppResult<()> {
        let event = PubSubEvent::UnreadCountUpdate {
            recipient_id: recipient_id.to_string(),
            bell_notifications: counts.bell_notifications,
            system_messages: counts.system_messages,
            total: counts.total,
        };
        self.publish(recipient_id, &event)
            .await
            .map_err(|e| atcloud_common::AppError::ChannelUnavailable {
                channel: "realtime".to_string(),
                reason: e.to_string(),
            })
    }
}
