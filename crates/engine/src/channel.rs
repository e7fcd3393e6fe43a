use async_trait::async_trait;
use bson::oid::ObjectId;
use serde::Serialize;

use crate::batch::ConsolidatedNotification;
use crate::error::EngineResult;
use crate::event::{NotificationEvent, Recipient};
use crate::quiet_hours::DigestSummary;

/// Outcome of one delivery attempt. Adapters never return `Err`; every
/// failure mode is captured here so callers can decide about retries and
/// integration health without unwinding.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub sent: bool,
    pub channel_name: Option<String>,
    pub failure: Option<SendFailure>,
}

impl SendOutcome {
    pub fn ok(channel_name: &str) -> Self {
        Self {
            sent: true,
            channel_name: Some(channel_name.to_string()),
            failure: None,
        }
    }

    pub fn failed(channel_name: &str, failure: SendFailure) -> Self {
        Self {
            sent: false,
            channel_name: Some(channel_name.to_string()),
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// 401/403 from the provider: the webhook was revoked or the token
    /// is gone. Flips the integration to `invalid_webhook`.
    Unauthorized,
    /// 404: the webhook endpoint no longer exists.
    NotFound,
    /// Provider-side throttling, with its suggested wait when given.
    RateLimited { retry_after_secs: Option<u64> },
    /// The channel is not configured for this workspace/user. Treated
    /// as the channel being absent, not as an error.
    Unavailable,
    Other(String),
}

impl SendFailure {
    /// Failures that mark the integration `invalid_webhook` immediately.
    pub fn invalidates_webhook(&self) -> bool {
        matches!(self, SendFailure::Unauthorized | SendFailure::NotFound)
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Unauthorized => write!(f, "unauthorized"),
            SendFailure::NotFound => write!(f, "webhook not found"),
            SendFailure::RateLimited {
                retry_after_secs: Some(secs),
            } => write!(f, "provider rate limited, retry after {secs}s"),
            SendFailure::RateLimited {
                retry_after_secs: None,
            } => write!(f, "provider rate limited"),
            SendFailure::Unavailable => write!(f, "channel not configured"),
            SendFailure::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// One chat-webhook delivery channel (Slack, Discord, ...). Adapters are
/// invoked in a fixed configured order so side effects are deterministic.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, workspace_id: ObjectId, event: &NotificationEvent) -> SendOutcome;
}

/// Rendered message for the push channel. Digest and consolidated
/// summaries use this shape too since `<type>_batch` is not part of the
/// event taxonomy.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

impl PushMessage {
    pub fn from_event(event: &NotificationEvent) -> Self {
        let body = event
            .payload
            .get("body")
            .or_else(|| event.payload.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            notification_type: event.notification_type.as_str().to_string(),
            title: event.title(),
            body,
            payload: event.payload.clone(),
        }
    }

    pub fn from_consolidated(item: &ConsolidatedNotification) -> Self {
        let title = match item.payload.get("count").and_then(|c| c.as_u64()) {
            Some(count) => format!("{count} updates"),
            None => item
                .payload
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Update")
                .to_string(),
        };
        let body = item
            .payload
            .get("titles")
            .and_then(|t| t.as_array())
            .map(|titles| {
                titles
                    .iter()
                    .filter_map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        Self {
            notification_type: item.notification_type.clone(),
            title,
            body,
            payload: item.payload.clone(),
        }
    }

    pub fn from_digest(digest: &DigestSummary) -> Self {
        Self {
            notification_type: "quiet_hours_digest".to_string(),
            title: digest.title.clone(),
            body: digest.body.clone(),
            payload: serde_json::json!({
                "count": digest.count,
                "by_type": digest.by_type,
            }),
        }
    }
}

/// Web Push delivery for one recipient.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, recipient: &Recipient, message: &PushMessage) -> SendOutcome;
}

/// Creates the persistent in-app record. The one channel that can never
/// be disabled.
#[async_trait]
pub trait InAppSink: Send + Sync {
    async fn create(&self, recipient: &Recipient, event: &NotificationEvent) -> EngineResult<()>;
}

/// Persistence seam for the integration health state machine.
#[async_trait]
pub trait IntegrationStatusStore: Send + Sync {
    /// Bumps the consecutive-failure counter and returns the new value.
    async fn record_failure(
        &self,
        workspace_id: ObjectId,
        provider: &str,
        error: &str,
    ) -> EngineResult<u32>;

    /// Transition to `error` after the consecutive-failure ceiling.
    async fn mark_error(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()>;

    /// Immediate transition on an unauthorized/not-found response.
    async fn mark_invalid(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()>;

    /// Resets the counter and restores `active`.
    async fn record_success(&self, workspace_id: ObjectId, provider: &str) -> EngineResult<()>;
}
