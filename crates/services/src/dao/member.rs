use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use mongodb::Database;

use beacon_db::models::{ProjectMember, WorkspaceMember};
use beacon_engine::EngineResult;
use beacon_engine::recipients::MembershipSource;

use super::base::{BaseDao, DaoResult};

pub struct MemberDao {
    workspace_members: BaseDao<WorkspaceMember>,
    project_members: BaseDao<ProjectMember>,
}

impl MemberDao {
    pub fn new(db: &Database) -> Self {
        Self {
            workspace_members: BaseDao::new(db, WorkspaceMember::COLLECTION),
            project_members: BaseDao::new(db, ProjectMember::COLLECTION),
        }
    }

    /// Members of a workspace, muted ones excluded.
    pub async fn workspace_members(&self, workspace_id: ObjectId) -> DaoResult<Vec<ObjectId>> {
        let members = self
            .workspace_members
            .find_many(
                doc! { "workspace_id": workspace_id, "is_muted": { "$ne": true } },
                None,
            )
            .await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }

    pub async fn project_members(&self, project_id: ObjectId) -> DaoResult<Vec<ObjectId>> {
        let members = self
            .project_members
            .find_many(doc! { "project_id": project_id }, None)
            .await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }
}

#[async_trait]
impl MembershipSource for MemberDao {
    async fn workspace_member_ids(&self, workspace_id: ObjectId) -> EngineResult<Vec<ObjectId>> {
        Ok(self.workspace_members(workspace_id).await?)
    }

    async fn project_member_ids(&self, project_id: ObjectId) -> EngineResult<Vec<ObjectId>> {
        Ok(self.project_members(project_id).await?)
    }
}
