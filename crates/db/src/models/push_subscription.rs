use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// A browser Web Push subscription registered by one of the user's
/// devices. A user may hold several at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime,
}

impl PushSubscription {
    pub const COLLECTION: &'static str = "push_subscriptions";
}
