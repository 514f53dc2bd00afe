//! System message entity.
//!
//! One row per notification, carrying the per-recipient read/visibility
//! state map as a JSONB document. The four state flags are monotonic: once
//! set they never reset, which makes concurrent writers benign
//! (last monotonic set wins).

use chrono::{DateTime, Utc};
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message types.
#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MessageType {
    #[sea_orm(string_value = "announcement")]
    Announcement,
    #[sea_orm(string_value = "update")]
    Update,
    #[sea_orm(string_value = "assignment")]
    Assignment,
    #[sea_orm(string_value = "reminder")]
    Reminder,
    #[sea_orm(string_value = "auth_level_change")]
    AuthLevelChange,
    #[sea_orm(string_value = "atcloud_role_change")]
    AtcloudRoleChange,
    #[sea_orm(string_value = "admin_notification")]
    AdminNotification,
    #[sea_orm(string_value = "user_management")]
    UserManagement,
}

/// Message priority, drives the retention age thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum Priority {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
}

/// Denormalized snapshot of the actor who created the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct CreatorSnapshot {
    /// Creator's user id.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Username.
    pub username: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Gender.
    #[serde(default)]
    pub gender: Option<String>,
    /// Authorization level at creation time.
    pub auth_level: String,
    /// Ministry role at creation time.
    #[serde(default)]
    pub role_in_atcloud: Option<String>,
}

/// Per-recipient read/visibility state.
///
/// The four flags are one-way: the mutators below set them and nothing ever
/// clears them. Deletion/removal are per-view and independent of each other
/// and of the read flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientState {
    /// Read in the system-messages view.
    pub read_in_system: bool,
    /// Read in the bell dropdown.
    pub read_in_bell: bool,
    /// Hidden from the bell dropdown.
    pub removed_from_bell: bool,
    /// Hidden from the system-messages view.
    pub deleted_from_system: bool,
    /// When `read_in_system` was first set.
    #[serde(default)]
    pub read_in_system_at: Option<DateTime<Utc>>,
    /// When `read_in_bell` was first set.
    #[serde(default)]
    pub read_in_bell_at: Option<DateTime<Utc>>,
    /// When `removed_from_bell` was first set.
    #[serde(default)]
    pub removed_from_bell_at: Option<DateTime<Utc>>,
    /// When `deleted_from_system` was first set.
    #[serde(default)]
    pub deleted_from_system_at: Option<DateTime<Utc>>,
    /// Most recent state mutation for this recipient.
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
}

impl RecipientState {
    /// Mark read in the system view. Idempotent; the timestamp keeps its
    /// first-set value.
    pub fn mark_read_in_system(&mut self, now: DateTime<Utc>) {
        if !self.read_in_system {
            self.read_in_system = true;
            self.read_in_system_at = Some(now);
        }
        self.last_interaction_at = Some(now);
    }

    /// Mark read in the bell view. Idempotent.
    pub fn mark_read_in_bell(&mut self, now: DateTime<Utc>) {
        if !self.read_in_bell {
            self.read_in_bell = true;
            self.read_in_bell_at = Some(now);
        }
        self.last_interaction_at = Some(now);
    }

    /// Mark read in both views in one mutation.
    pub fn mark_read_everywhere(&mut self, now: DateTime<Utc>) {
        self.mark_read_in_system(now);
        self.mark_read_in_bell(now);
    }

    /// Hide from the system view. Bell visibility and read flags unaffected.
    pub fn delete_from_system(&mut self, now: DateTime<Utc>) {
        if !self.deleted_from_system {
            self.deleted_from_system = true;
            self.deleted_from_system_at = Some(now);
        }
        self.last_interaction_at = Some(now);
    }

    /// Hide from the bell view. System visibility and read flags unaffected.
    pub fn remove_from_bell(&mut self, now: DateTime<Utc>) {
        if !self.removed_from_bell {
            self.removed_from_bell = true;
            self.removed_from_bell_at = Some(now);
        }
        self.last_interaction_at = Some(now);
    }

    /// Dismissed from at least one view (retention rule 1 predicate).
    #[must_use]
    pub const fn is_dismissed(&self) -> bool {
        self.deleted_from_system || self.removed_from_bell
    }

    /// Read or dismissed anywhere (retention rule 5 predicate).
    #[must_use]
    pub const fn is_seen(&self) -> bool {
        self.deleted_from_system || self.removed_from_bell || self.read_in_system || self.read_in_bell
    }

    /// Counts toward the system-view unread counter.
    #[must_use]
    pub const fn unread_in_system(&self) -> bool {
        !self.deleted_from_system && !self.read_in_system
    }

    /// Counts toward the bell-view unread counter.
    #[must_use]
    pub const fn unread_in_bell(&self) -> bool {
        !self.removed_from_bell && !self.read_in_bell
    }
}

/// Map of recipient id to [`RecipientState`], stored as one JSONB document.
///
/// Always a map, never an array: callers iterate one container shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct RecipientMap(pub HashMap<String, RecipientState>);

impl RecipientMap {
    /// Build a map with one all-false entry per distinct recipient id.
    /// Duplicate ids collapse to a single entry.
    #[must_use]
    pub fn with_recipients<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for id in ids {
            map.entry(id.into()).or_insert_with(RecipientState::default);
        }
        Self(map)
    }

    /// State entry for one recipient.
    #[must_use]
    pub fn get(&self, recipient_id: &str) -> Option<&RecipientState> {
        self.0.get(recipient_id)
    }

    /// Mutable state entry for one recipient.
    pub fn get_mut(&mut self, recipient_id: &str) -> Option<&mut RecipientState> {
        self.0.get_mut(recipient_id)
    }

    /// Number of targeted recipients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message targets nobody.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(recipient_id, state)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RecipientState)> {
        self.0.iter()
    }

    /// Every entry satisfies the predicate. False for an empty map.
    pub fn all_recipients<F>(&self, predicate: F) -> bool
    where
        F: Fn(&RecipientState) -> bool,
    {
        !self.0.is_empty() && self.0.values().all(predicate)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_message")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub title: String,

    pub content: String,

    /// Message type
    pub message_type: MessageType,

    /// Priority, drives retention
    pub priority: Priority,

    /// Denormalized creator snapshot
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub creator: Option<CreatorSnapshot>,

    /// Suppress the creator in client-facing reads
    #[sea_orm(default_value = false)]
    pub hide_creator: bool,

    /// False = logically retired, excluded from every query
    #[sea_orm(default_value = true)]
    pub is_active: bool,

    /// Per-recipient state map
    #[sea_orm(column_type = "JsonBinary")]
    pub recipients: RecipientMap,

    /// Denormalized hint for single-recipient messages
    #[sea_orm(nullable)]
    pub target_user_id: Option<String>,

    /// Producer-supplied metadata
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    /// Optional expiry for time-sensitive messages
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Age of the record in whole days at `now`.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at.with_timezone(&Utc)).num_days()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_read_everywhere_sets_both_flags_from_any_state() {
        // From pristine state.
        let mut state = RecipientState::default();
        state.mark_read_everywhere(now());
        assert!(state.read_in_system);
        assert!(state.read_in_bell);
        assert!(state.read_in_system_at.is_some());
        assert!(state.read_in_bell_at.is_some());

        // From a half-read state.
        let mut state = RecipientState::default();
        state.mark_read_in_bell(now());
        state.mark_read_everywhere(now());
        assert!(state.read_in_system);
        assert!(state.read_in_bell);
    }

    #[test]
    fn test_read_everywhere_is_idempotent() {
        let mut state = RecipientState::default();
        state.mark_read_everywhere(now());
        let first_system_at = state.read_in_system_at;
        let first_bell_at = state.read_in_bell_at;

        state.mark_read_everywhere(now());
        assert!(state.read_in_system);
        assert!(state.read_in_bell);
        // Timestamps keep their first-set values.
        assert_eq!(state.read_in_system_at, first_system_at);
        assert_eq!(state.read_in_bell_at, first_bell_at);
    }

    #[test]
    fn test_delete_from_system_leaves_other_flags_alone() {
        let mut state = RecipientState::default();
        state.delete_from_system(now());
        assert!(state.deleted_from_system);
        assert!(!state.removed_from_bell);
        assert!(!state.read_in_system);
        assert!(!state.read_in_bell);
    }

    #[test]
    fn test_remove_from_bell_leaves_other_flags_alone() {
        let mut state = RecipientState::default();
        state.remove_from_bell(now());
        assert!(state.removed_from_bell);
        assert!(!state.deleted_from_system);
        assert!(!state.read_in_system);
        assert!(!state.read_in_bell);
    }

    #[test]
    fn test_flags_are_monotonic() {
        let mut state = RecipientState::default();
        state.mark_read_in_system(now());
        state.mark_read_in_bell(now());
        state.delete_from_system(now());
        state.remove_from_bell(now());

        // Re-applying every mutator never clears anything.
        state.mark_read_in_system(now());
        state.mark_read_everywhere(now());
        state.delete_from_system(now());
        state.remove_from_bell(now());

        assert!(state.read_in_system);
        assert!(state.read_in_bell);
        assert!(state.deleted_from_system);
        assert!(state.removed_from_bell);
    }

    #[test]
    fn test_unread_predicates_use_disjoint_flags() {
        let mut state = RecipientState::default();
        assert!(state.unread_in_system());
        assert!(state.unread_in_bell());

        // Reading in the bell alone leaves the system counter untouched.
        state.mark_read_in_bell(now());
        assert!(state.unread_in_system());
        assert!(!state.unread_in_bell());

        // Deleting from system excludes it from the system counter without
        // marking it read.
        let mut state = RecipientState::default();
        state.delete_from_system(now());
        assert!(!state.unread_in_system());
        assert!(state.unread_in_bell());
    }

    #[test]
    fn test_recipient_map_dedups_input_ids() {
        let map = RecipientMap::with_recipients(["u1", "u2", "u1", "u3", "u2"]);
        assert_eq!(map.len(), 3);
        assert!(map.get("u1").is_some());
        assert!(map.get("u2").is_some());
        assert!(map.get("u3").is_some());
    }

    #[test]
    fn test_all_recipients_is_false_for_empty_map() {
        let map = RecipientMap::default();
        assert!(!map.all_recipients(RecipientState::is_dismissed));
    }

    #[test]
    fn test_recipient_state_json_round_trips_camel_case() {
        let mut state = RecipientState::default();
        state.mark_read_in_system(now());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["readInSystem"], serde_json::json!(true));
        assert_eq!(json["readInBell"], serde_json::json!(false));
    }
}
