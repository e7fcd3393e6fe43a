use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use tracing::{debug, warn};

use beacon_db::models::WebhookProvider;
use beacon_engine::channel::{ChannelAdapter, SendFailure, SendOutcome};
use beacon_engine::event::NotificationEvent;

use super::{failure_for_status, format, retry_after};
use crate::dao::IntegrationDao;

const CHANNEL_NAME: &str = "discord";

/// Discord webhook delivery for a workspace.
pub struct DiscordWebhookChannel {
    integrations: Arc<IntegrationDao>,
    http: reqwest::Client,
}

impl DiscordWebhookChannel {
    pub fn new(integrations: Arc<IntegrationDao>, timeout: Duration) -> Self {
        Self {
            integrations,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for DiscordWebhookChannel {
    fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    async fn send(&self, workspace_id: ObjectId, event: &NotificationEvent) -> SendOutcome {
        let integration = match self
            .integrations
            .find_active(workspace_id, WebhookProvider::Discord)
            .await
        {
            Ok(Some(integration)) => integration,
            Ok(None) => return SendOutcome::failed(CHANNEL_NAME, SendFailure::Unavailable),
            Err(error) => {
                warn!(%workspace_id, %error, "Failed to load Discord integration");
                return SendOutcome::failed(CHANNEL_NAME, SendFailure::Other(error.to_string()));
            }
        };

        let message = format::discord_message(event);
        let response = match self
            .http
            .post(&integration.webhook_url)
            .json(&message)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                return SendOutcome::failed(CHANNEL_NAME, SendFailure::Other(error.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(%workspace_id, "Delivered Discord notification");
            return SendOutcome::ok(CHANNEL_NAME);
        }
        let delay = retry_after(&response);
        SendOutcome::failed(CHANNEL_NAME, failure_for_status(status, delay))
    }
}
