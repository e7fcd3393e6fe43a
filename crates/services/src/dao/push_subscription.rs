use bson::{DateTime, doc, oid::ObjectId};
use mongodb::Database;

use beacon_db::models::PushSubscription;

use super::base::{BaseDao, DaoResult};

pub struct PushSubscriptionDao {
    pub base: BaseDao<PushSubscription>,
}

impl PushSubscriptionDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, PushSubscription::COLLECTION),
        }
    }

    /// Registers a device subscription, replacing any previous record
    /// for the same endpoint.
    pub async fn subscribe(
        &self,
        user_id: ObjectId,
        endpoint: String,
        p256dh: String,
        auth: String,
        user_agent: Option<String>,
    ) -> DaoResult<()> {
        let subscription = PushSubscription {
            id: None,
            user_id,
            endpoint: endpoint.clone(),
            p256dh,
            auth,
            user_agent,
            created_at: DateTime::now(),
        };
        self.base
            .replace_one(doc! { "endpoint": &endpoint }, &subscription)
            .await
    }

    pub async fn unsubscribe(&self, user_id: ObjectId, endpoint: &str) -> DaoResult<bool> {
        let deleted = self
            .base
            .hard_delete(doc! { "user_id": user_id, "endpoint": endpoint })
            .await?;
        Ok(deleted > 0)
    }

    pub async fn list_for_user(&self, user_id: ObjectId) -> DaoResult<Vec<PushSubscription>> {
        self.base.find_many(doc! { "user_id": user_id }, None).await
    }

    /// Cleanup when the push service reports the endpoint gone.
    pub async fn remove_stale(&self, endpoint: &str) -> DaoResult<u64> {
        self.base.hard_delete(doc! { "endpoint": endpoint }).await
    }
}
