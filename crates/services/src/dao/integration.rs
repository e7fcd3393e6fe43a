use async_trait::async_trait;
use bson::{DateTime, doc, oid::ObjectId};
use mongodb::Database;
use mongodb::options::ReturnDocument;

use beacon_db::models::{IntegrationStatus, WebhookIntegration, WebhookProvider};
use beacon_engine::EngineResult;
use beacon_engine::channel::IntegrationStatusStore;

use super::base::{BaseDao, DaoError, DaoResult};

pub struct IntegrationDao {
    pub base: BaseDao<WebhookIntegration>,
}

impl IntegrationDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, WebhookIntegration::COLLECTION),
        }
    }

    /// The active integration for a provider; `error` and
    /// `invalid_webhook` integrations are skipped by delivery.
    pub async fn find_active(
        &self,
        workspace_id: ObjectId,
        provider: WebhookProvider,
    ) -> DaoResult<Option<WebhookIntegration>> {
        self.base
            .find_one(doc! {
                "workspace_id": workspace_id,
                "provider": provider.as_str(),
                "status": "active",
            })
            .await
    }

    pub async fn find_all(&self, workspace_id: ObjectId) -> DaoResult<Vec<WebhookIntegration>> {
        self.base
            .find_many(doc! { "workspace_id": workspace_id }, None)
            .await
    }

    /// Connects or replaces a workspace's webhook for one provider.
    /// Reconnecting resets the health state machine to `active`.
    pub async fn connect(
        &self,
        workspace_id: ObjectId,
        provider: WebhookProvider,
        webhook_url: String,
    ) -> DaoResult<WebhookIntegration> {
        let now = DateTime::now();
        let integration = WebhookIntegration {
            id: None,
            workspace_id,
            provider,
            webhook_url,
            status: IntegrationStatus::Active,
            consecutive_failures: 0,
            last_error: None,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        self.base
            .replace_one(
                doc! { "workspace_id": workspace_id, "provider": provider.as_str() },
                &integration,
            )
            .await?;
        self.base
            .find_one(doc! { "workspace_id": workspace_id, "provider": provider.as_str() })
            .await?
            .ok_or(DaoError::NotFound)
    }

    pub async fn disconnect(
        &self,
        workspace_id: ObjectId,
        provider: WebhookProvider,
    ) -> DaoResult<bool> {
        let deleted = self
            .base
            .hard_delete(doc! { "workspace_id": workspace_id, "provider": provider.as_str() })
            .await?;
        Ok(deleted > 0)
    }

    async fn bump_failures(
        &self,
        workspace_id: ObjectId,
        provider: &str,
        error: &str,
    ) -> DaoResult<u32> {
        let updated = self
            .base
            .collection()
            .find_one_and_update(
                doc! { "workspace_id": workspace_id, "provider": provider },
                doc! {
                    "$inc": { "consecutive_failures": 1 },
                    "$set": { "last_error": error, "updated_at": DateTime::now() },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(DaoError::Mongo)?;
        Ok(updated.map(|i| i.consecutive_failures).unwrap_or(0))
    }

    async fn set_status(
        &self,
        workspace_id: ObjectId,
        provider: &str,
        status: &str,
    ) -> DaoResult<bool> {
        self.base
            .update_one(
                doc! { "workspace_id": workspace_id, "provider": provider },
                doc! { "$set": { "status": status } },
            )
            .await
    }
}

#[async_trait]
impl IntegrationStatusStore for IntegrationDao {
    async fn record_failure(
        &self,
        workspace_id: ObjectId,
        provider: &str,
        error: &str,
    ) -> EngineResult<u32> {
        Ok(self.bump_failures(workspace_id, provider, error).await?)
    }

    async fn mark_error(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.set_status(workspace_id, provider, "error").await?;
        Ok(())
    }

    async fn mark_invalid(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.set_status(workspace_id, provider, "invalid_webhook")
            .await?;
        Ok(())
    }

    async fn record_success(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()> {
        self.base
            .update_one(
                doc! { "workspace_id": workspace_id, "provider": provider },
                doc! { "$set": {
                    "status": "active",
                    "consecutive_failures": 0,
                    "last_error": null,
                    "last_success_at": DateTime::now(),
                } },
            )
            .await?;
        Ok(())
    }
}
