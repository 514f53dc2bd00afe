//! Store contract tests.
//!
//! Exercises the `MessageStore` trait through a handle, the way core
//! services consume it.

use std::sync::Arc;

use atcloud_db::entities::system_message::{self, MessageType, Priority, RecipientMap};
use atcloud_db::repositories::{MessageStore, MessageStoreHandle};
use atcloud_db::test_utils::InMemoryMessageStore;
use chrono::{Duration, Utc};

fn message(id: &str, age_minutes: i64) -> system_message::Model {
    system_message::Model {
        id: id.to_string(),
        title: "Schedule change".to_string(),
        content: "The rehearsal moved to Saturday.".to_string(),
        message_type: MessageType::Update,
        priority: Priority::Low,
        creator: None,
        hide_creator: false,
        is_active: true,
        recipients: RecipientMap::with_recipients(["u1", "u2"]),
        target_user_id: None,
        metadata: None,
        created_at: (Utc::now() - Duration::minutes(age_minutes)).into(),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_find_active_returns_newest_first() {
    let store: MessageStoreHandle = Arc::new(InMemoryMessageStore::new());

    store.insert(message("older", 30)).await.expect("insert");
    store.insert(message("newest", 1)).await.expect("insert");
    store.insert(message("oldest", 60)).await.expect("insert");

    let active = store.find_active().await.expect("find_active");
    let ids: Vec<&str> = active.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["newest", "older", "oldest"]);
}

#[tokio::test]
async fn test_update_persists_recipient_state() {
    let store: MessageStoreHandle = Arc::new(InMemoryMessageStore::new());
    let mut model = message("m1", 0);
    store.insert(model.clone()).await.expect("insert");

    model
        .recipients
        .get_mut("u1")
        .expect("u1 targeted")
        .mark_read_everywhere(Utc::now());
    store.update(model).await.expect("update");

    let stored = store
        .find_by_id("m1")
        .await
        .expect("find_by_id")
        .expect("record exists");
    let state = stored.recipients.get("u1").expect("u1 targeted");
    assert!(state.read_in_system);
    assert!(state.read_in_bell);
    // The other recipient is untouched.
    let other = stored.recipients.get("u2").expect("u2 targeted");
    assert!(!other.read_in_system);
}

#[tokio::test]
async fn test_delete_many_reports_batch_count() {
    let store: MessageStoreHandle = Arc::new(InMemoryMessageStore::new());
    store.insert(message("m1", 0)).await.expect("insert");
    store.insert(message("m2", 0)).await.expect("insert");

    let deleted = store
        .delete_many(&[
            "m1".to_string(),
            "m2".to_string(),
            "not-there".to_string(),
        ])
        .await
        .expect("delete_many");
    assert_eq!(deleted, 2);
    assert!(store.find_by_id("m1").await.expect("find").is_none());
}

#[tokio::test]
async fn test_empty_delete_batch_is_a_no_op() {
    let store: MessageStoreHandle = Arc::new(InMemoryMessageStore::new());
    let deleted = store.delete_many(&[]).await.expect("delete_many");
    assert_eq!(deleted, 0);
}
