use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use beacon_engine::event::{EventType, NotificationEvent, Urgency};
use beacon_engine::recipients::EventScope;

use crate::{error::ApiError, extractors::auth::AuthUser, state::AppState};

#[derive(Debug, Deserialize)]
pub struct TriggerEventRequest {
    #[serde(rename = "type")]
    pub notification_type: EventType,
    pub scope: EventScope,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub urgency: Option<Urgency>,
    pub batchable: Option<bool>,
}

// ---- POST /api/events ----------------------------------------------------

/// Accepts a domain event from an internal producer and dispatches it in
/// the background. Always answers 202 once the scope resolves; delivery
/// outcomes are not reported to the caller.
pub async fn trigger(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<TriggerEventRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let recipients = state.resolver.resolve(&body.scope).await?;

    let mut event = NotificationEvent::new(body.notification_type, body.payload, recipients);
    if let Some(urgency) = body.urgency {
        event.urgency = urgency;
    }
    if let Some(batchable) = body.batchable {
        event.batchable = batchable;
    }

    let recipient_count = event.recipients.len();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.dispatch(event).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "accepted": true,
            "recipients": recipient_count,
        })),
    ))
}
