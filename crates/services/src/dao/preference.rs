use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use mongodb::Database;

use beacon_engine::EngineResult;
use beacon_engine::preferences::{PreferenceRepository, Preferences};

use super::base::{BaseDao, DaoResult};

pub struct PreferenceDao {
    pub base: BaseDao<Preferences>,
}

impl PreferenceDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Preferences::COLLECTION),
        }
    }

    pub async fn find(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
    ) -> DaoResult<Option<Preferences>> {
        self.base
            .find_one(doc! { "user_id": user_id, "workspace_id": workspace_id })
            .await
    }

    /// Upsert keyed on (user, workspace); the unique index makes
    /// concurrent first-writes collapse onto one document.
    pub async fn upsert(&self, prefs: &Preferences) -> DaoResult<()> {
        self.base
            .replace_one(
                doc! { "user_id": prefs.user_id, "workspace_id": prefs.workspace_id },
                prefs,
            )
            .await
    }

    pub async fn remove(&self, user_id: ObjectId, workspace_id: ObjectId) -> DaoResult<u64> {
        self.base
            .hard_delete(doc! { "user_id": user_id, "workspace_id": workspace_id })
            .await
    }
}

#[async_trait]
impl PreferenceRepository for PreferenceDao {
    async fn get(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
    ) -> EngineResult<Option<Preferences>> {
        Ok(self.find(user_id, workspace_id).await?)
    }

    async fn save(&self, prefs: &Preferences) -> EngineResult<()> {
        Ok(self.upsert(prefs).await?)
    }

    async fn delete(&self, user_id: ObjectId, workspace_id: ObjectId) -> EngineResult<()> {
        self.remove(user_id, workspace_id).await?;
        Ok(())
    }
}
