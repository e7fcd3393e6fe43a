use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use beacon_db::models::{WebhookIntegration, WebhookProvider};

use crate::{error::ApiError, extractors::auth::AuthUser, routes::parse_oid, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub webhook_url: String,
}

fn parse_provider(s: &str) -> Result<WebhookProvider, ApiError> {
    match s {
        "slack" => Ok(WebhookProvider::Slack),
        "discord" => Ok(WebhookProvider::Discord),
        other => Err(ApiError::BadRequest(format!(
            "Unknown provider: {other}"
        ))),
    }
}

// ---- GET /api/workspace/{workspace_id}/integration -----------------------

pub async fn list(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<WebhookIntegration>>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let integrations = state.integrations.find_all(workspace_id).await?;
    Ok(Json(integrations))
}

// ---- PUT /api/workspace/{workspace_id}/integration/{provider} ------------

/// Connects (or replaces) the workspace webhook for a provider. A
/// reconnect resets the integration health back to `active`.
pub async fn connect(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((workspace_id, provider)): Path<(String, String)>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<WebhookIntegration>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let provider = parse_provider(&provider)?;

    if !body.webhook_url.starts_with("https://") {
        return Err(ApiError::Validation(
            "webhook_url must be an https URL".to_string(),
        ));
    }

    let integration = state
        .integrations
        .connect(workspace_id, provider, body.webhook_url)
        .await?;
    Ok(Json(integration))
}

// ---- DELETE /api/workspace/{workspace_id}/integration/{provider} ---------

pub async fn disconnect(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((workspace_id, provider)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let provider = parse_provider(&provider)?;
    let removed = state.integrations.disconnect(workspace_id, provider).await?;
    if !removed {
        return Err(ApiError::NotFound("Integration not found".to_string()));
    }
    Ok(Json(serde_json::json!({ "disconnected": true })))
}
