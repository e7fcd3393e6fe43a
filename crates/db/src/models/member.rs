use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMember {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub user_id: ObjectId,
    #[serde(default)]
    pub is_muted: bool,
    pub joined_at: DateTime,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl WorkspaceMember {
    pub const COLLECTION: &'static str = "workspace_members";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub project_id: ObjectId,
    pub workspace_id: ObjectId,
    pub user_id: ObjectId,
    pub joined_at: DateTime,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl ProjectMember {
    pub const COLLECTION: &'static str = "project_members";
}
