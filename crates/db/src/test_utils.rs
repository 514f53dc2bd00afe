//! Test utilities for storage.
//!
//! Provides an in-memory [`MessageStore`] for engine tests and helpers for
//! connecting to a real test database.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::entities::system_message;
use crate::repositories::MessageStore;
use async_trait::async_trait;
use atcloud_common::{AppError, AppResult};
use tokio::sync::RwLock;

/// In-memory message store.
///
/// Backs the engine's unit and integration tests without a database. The
/// failure switches simulate storage outages for rollback and error-path
/// coverage.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    records: Arc<RwLock<HashMap<String, system_message::Model>>>,
    fail_inserts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    fail_finds: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail with a storage error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent batch deletes fail with a storage error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent scans fail with a storage error.
    pub fn fail_finds(&self, fail: bool) {
        self.fail_finds.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, model: system_message::Model) -> AppResult<system_message::Model> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("insert failed (injected)".to_string()));
        }
        self.records
            .write()
            .await
            .insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn update(&self, model: system_message::Model) -> AppResult<system_message::Model> {
        let mut records = self.records.write().await;
        if !records.contains_key(&model.id) {
            return Err(AppError::Storage(format!(
                "no record with id {} to update",
                model.id
            )));
        }
        records.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<system_message::Model>> {
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(AppError::Storage("find failed (injected)".to_string()));
        }
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_active(&self) -> AppResult<Vec<system_message::Model>> {
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(AppError::Storage("scan failed (injected)".to_string()));
        }
        let mut active: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn delete_many(&self, ids: &[String]) -> AppResult<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("delete failed (injected)".to_string()));
        }
        let mut records = self.records.write().await;
        let mut deleted = 0;
        for id in ids {
            if records.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "atcloud_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "atcloud_test".to_string()),
            database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "atcloud_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::system_message::{MessageType, Priority, RecipientMap};
    use chrono::Utc;

    fn message(id: &str) -> system_message::Model {
        system_message::Model {
            id: id.to_string(),
            title: "Test".to_string(),
            content: "Body".to_string(),
            message_type: MessageType::Announcement,
            priority: Priority::Medium,
            creator: None,
            hide_creator: false,
            is_active: true,
            recipients: RecipientMap::with_recipients(["u1"]),
            target_user_id: None,
            metadata: None,
            created_at: Utc::now().into(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_find_delete_round_trip() {
        let store = InMemoryMessageStore::new();
        store.insert(message("m1")).await.unwrap();
        store.insert(message("m2")).await.unwrap();

        assert!(store.find_by_id("m1").await.unwrap().is_some());
        assert_eq!(store.find_active().await.unwrap().len(), 2);

        let deleted = store
            .delete_many(&["m1".to_string(), "m2".to_string(), "m3".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_find_active_excludes_retired_records() {
        let store = InMemoryMessageStore::new();
        store.insert(message("m1")).await.unwrap();
        let mut retired = message("m2");
        retired.is_active = false;
        store.insert(retired).await.unwrap();

        let active = store.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "m1");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryMessageStore::new();
        store.fail_inserts(true);
        assert!(store.insert(message("m1")).await.is_err());

        store.fail_inserts(false);
        store.insert(message("m1")).await.unwrap();
        store.fail_deletes(true);
        assert!(store.delete_many(&["m1".to_string()]).await.is_err());
        assert_eq!(store.len().await, 1);
    }
}
