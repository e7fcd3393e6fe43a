use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use beacon_services::dao::PaginationParams;

use crate::{
    error::ApiError,
    extractors::auth::AuthUser,
    routes::parse_oid,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

// ---- GET /api/workspace/{workspace_id}/notification ----------------------

pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;

    let mut params = PaginationParams::default();
    if let Some(page) = query.page {
        params.page = page.max(1);
    }
    if let Some(per_page) = query.per_page {
        params.per_page = per_page.clamp(1, 100);
    }

    let result = state
        .notifications
        .list_for_user(auth.user_id, workspace_id, query.unread_only, &params)
        .await?;

    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
        "page": result.page,
        "per_page": result.per_page,
        "total_pages": result.total_pages,
    })))
}

// ---- GET /api/workspace/{workspace_id}/notification/unread-count ---------

pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let count = state
        .notifications
        .unread_count(auth.user_id, workspace_id)
        .await?;
    Ok(Json(serde_json::json!({ "unread": count })))
}

// ---- PUT /api/workspace/{workspace_id}/notification/{id}/read ------------

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_workspace_id, notification_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notification_id = parse_oid(&notification_id)?;
    let updated = state
        .notifications
        .mark_read(notification_id, auth.user_id)
        .await?;
    if !updated {
        return Err(ApiError::NotFound("Notification not found".to_string()));
    }
    Ok(Json(serde_json::json!({ "read": true })))
}

// ---- PUT /api/workspace/{workspace_id}/notification/read-all -------------

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let modified = state
        .notifications
        .mark_all_read(auth.user_id, workspace_id)
        .await?;
    Ok(Json(serde_json::json!({ "read": modified })))
}
