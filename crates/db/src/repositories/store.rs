//! Store contract for system messages.
//!
//! Core services talk to persistence through this trait so the engine can
//! run against the sea-orm repository in production and an in-memory store
//! in tests.

use crate::entities::system_message;
use async_trait::async_trait;
use atcloud_common::AppResult;
use std::sync::Arc;

/// Persistence operations the notification engine relies on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message record.
    async fn insert(&self, model: system_message::Model) -> AppResult<system_message::Model>;

    /// Persist an updated message record (keyed by id).
    async fn update(&self, model: system_message::Model) -> AppResult<system_message::Model>;

    /// Find one record by id, active or not.
    async fn find_by_id(&self, id: &str) -> AppResult<Option<system_message::Model>>;

    /// All active records.
    async fn find_active(&self) -> AppResult<Vec<system_message::Model>>;

    /// Delete the given ids in one batch. Returns the number deleted.
    async fn delete_many(&self, ids: &[String]) -> AppResult<u64>;
}

/// Wrapper for boxed `MessageStore` trait object.
pub type MessageStoreHandle = Arc<dyn MessageStore>;
