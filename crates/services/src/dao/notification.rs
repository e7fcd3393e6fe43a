use async_trait::async_trait;
use bson::{DateTime, doc, oid::ObjectId};
use mongodb::Database;

use beacon_db::models::Notification;
use beacon_engine::EngineResult;
use beacon_engine::channel::InAppSink;
use beacon_engine::event::{NotificationEvent, Recipient};

use super::base::{BaseDao, DaoResult, PaginatedResult, PaginationParams};

pub struct NotificationDao {
    pub base: BaseDao<Notification>,
}

impl NotificationDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Notification::COLLECTION),
        }
    }

    pub async fn create_for(
        &self,
        recipient: &Recipient,
        event: &NotificationEvent,
    ) -> DaoResult<ObjectId> {
        let body = event
            .payload
            .get("body")
            .or_else(|| event.payload.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let notification = Notification {
            id: None,
            workspace_id: recipient.workspace_id,
            user_id: recipient.user_id,
            notification_type: event.notification_type.as_str().to_string(),
            title: event.title(),
            body,
            payload: event.payload.clone(),
            is_read: false,
            read_at: None,
            created_at: DateTime::now(),
        };
        self.base.insert_one(&notification).await
    }

    pub async fn list_for_user(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
        unread_only: bool,
        params: &PaginationParams,
    ) -> DaoResult<PaginatedResult<Notification>> {
        let mut filter = doc! { "user_id": user_id, "workspace_id": workspace_id };
        if unread_only {
            filter.insert("is_read", false);
        }
        self.base
            .find_paginated(filter, Some(doc! { "created_at": -1 }), params)
            .await
    }

    pub async fn unread_count(&self, user_id: ObjectId, workspace_id: ObjectId) -> DaoResult<u64> {
        self.base
            .count(doc! { "user_id": user_id, "workspace_id": workspace_id, "is_read": false })
            .await
    }

    /// Marks one notification read, scoped to its owner.
    pub async fn mark_read(&self, id: ObjectId, user_id: ObjectId) -> DaoResult<bool> {
        self.base
            .update_one(
                doc! { "_id": id, "user_id": user_id, "is_read": false },
                doc! { "$set": { "is_read": true, "read_at": DateTime::now() } },
            )
            .await
    }

    pub async fn mark_all_read(&self, user_id: ObjectId, workspace_id: ObjectId) -> DaoResult<u64> {
        let result = self
            .base
            .collection()
            .update_many(
                doc! { "user_id": user_id, "workspace_id": workspace_id, "is_read": false },
                doc! { "$set": { "is_read": true, "read_at": DateTime::now() } },
            )
            .await
            .map_err(super::base::DaoError::Mongo)?;
        Ok(result.modified_count)
    }
}

#[async_trait]
impl InAppSink for NotificationDao {
    async fn create(&self, recipient: &Recipient, event: &NotificationEvent) -> EngineResult<()> {
        self.create_for(recipient, event).await?;
        Ok(())
    }
}
