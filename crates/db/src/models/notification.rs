use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// Persisted in-app notification record. One is created per surviving
/// recipient on every dispatch, regardless of push/webhook outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub user_id: ObjectId,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub is_read: bool,
    pub read_at: Option<DateTime>,
    pub created_at: DateTime,
}

impl Notification {
    pub const COLLECTION: &'static str = "notifications";
}
