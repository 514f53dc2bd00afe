//! System message repository.

use std::sync::Arc;

use crate::entities::{SystemMessage, system_message};
use crate::repositories::MessageStore;
use async_trait::async_trait;
use atcloud_common::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Unchanged, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};

/// System message repository for database operations.
#[derive(Clone)]
pub struct SystemMessageRepository {
    db: Arc<DatabaseConnection>,
}

impl SystemMessageRepository {
    /// Create a new system message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn active_model_for_insert(model: system_message::Model) -> system_message::ActiveModel {
        system_message::ActiveModel {
            id: Set(model.id),
            title: Set(model.title),
            content: Set(model.content),
            message_type: Set(model.message_type),
            priority: Set(model.priority),
            creator: Set(model.creator),
            hide_creator: Set(model.hide_creator),
            is_active: Set(model.is_active),
            recipients: Set(model.recipients),
            target_user_id: Set(model.target_user_id),
            metadata: Set(model.metadata),
            created_at: Set(model.created_at),
            expires_at: Set(model.expires_at),
        }
    }

    /// Deactivate active records whose `expires_at` has passed.
    /// Returns the number of rows touched.
    pub async fn deactivate_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        use sea_orm::UpdateResult;

        let result: UpdateResult = SystemMessage::update_many()
            .filter(system_message::Column::IsActive.eq(true))
            .filter(system_message::Column::ExpiresAt.is_not_null())
            .filter(system_message::Column::ExpiresAt.lte(now))
            .col_expr(system_message::Column::IsActive, false.into())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Hard-delete inactive records created before `cutoff`.
    /// Returns the number deleted.
    pub async fn purge_inactive_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        use sea_orm::DeleteResult;

        let result: DeleteResult = SystemMessage::delete_many()
            .filter(system_message::Column::IsActive.eq(false))
            .filter(system_message::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        Ok(result.rows_affected)
    }
}

#[async_trait]
impl MessageStore for SystemMessageRepository {
    async fn insert(&self, model: system_message::Model) -> AppResult<system_message::Model> {
        Self::active_model_for_insert(model)
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn update(&self, model: system_message::Model) -> AppResult<system_message::Model> {
        let active = system_message::ActiveModel {
            id: Unchanged(model.id),
            title: Set(model.title),
            content: Set(model.content),
            message_type: Set(model.message_type),
            priority: Set(model.priority),
            creator: Set(model.creator),
            hide_creator: Set(model.hide_creator),
            is_active: Set(model.is_active),
            recipients: Set(model.recipients),
            target_user_id: Set(model.target_user_id),
            metadata: Set(model.metadata),
            created_at: Set(model.created_at),
            expires_at: Set(model.expires_at),
        };

        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<system_message::Model>> {
        SystemMessage::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn find_active(&self) -> AppResult<Vec<system_message::Model>> {
        SystemMessage::find()
            .filter(system_message::Column::IsActive.eq(true))
            .order_by_desc(system_message::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn delete_many(&self, ids: &[String]) -> AppResult<u64> {
        use sea_orm::DeleteResult;

        if ids.is_empty() {
            return Ok(0);
        }

        let result: DeleteResult = SystemMessage::delete_many()
            .filter(system_message::Column::Id.is_in(ids.iter().cloned()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
