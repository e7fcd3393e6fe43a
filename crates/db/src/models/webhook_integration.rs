use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// A workspace's chat-webhook integration (one per provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookIntegration {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub provider: WebhookProvider,
    pub webhook_url: String,
    #[serde(default)]
    pub status: IntegrationStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProvider {
    Slack,
    Discord,
}

impl WebhookProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProvider::Slack => "slack",
            WebhookProvider::Discord => "discord",
        }
    }
}

/// Health of an integration. `Error` and `InvalidWebhook` are terminal
/// until the workspace reconnects the integration out of band; a
/// successful send implicitly restores `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[default]
    Active,
    Error,
    InvalidWebhook,
}

impl WebhookIntegration {
    pub const COLLECTION: &'static str = "webhook_integrations";
}
