use axum::{Json, extract::State, http::HeaderMap};
use serde::Deserialize;

use crate::{error::ApiError, extractors::auth::AuthUser, state::AppState};

/// Browser `PushSubscription.toJSON()` shape.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

// ---- POST /api/push/subscription -----------------------------------------

pub async fn subscribe(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<SubscribeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.endpoint.is_empty() {
        return Err(ApiError::Validation("endpoint must not be empty".to_string()));
    }

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    state
        .push_subscriptions
        .subscribe(
            auth.user_id,
            body.endpoint,
            body.keys.p256dh,
            body.keys.auth,
            user_agent,
        )
        .await?;

    Ok(Json(serde_json::json!({ "subscribed": true })))
}

// ---- DELETE /api/push/subscription ----------------------------------------

pub async fn unsubscribe(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UnsubscribeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .push_subscriptions
        .unsubscribe(auth.user_id, &body.endpoint)
        .await?;
    Ok(Json(serde_json::json!({ "unsubscribed": removed })))
}
