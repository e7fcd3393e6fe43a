use axum::{
    Json,
    extract::{Path, State},
};

use beacon_engine::preferences::{Preferences, PreferencesUpdate};
use beacon_engine::quiet_hours::QuietHoursStatus;

use crate::{error::ApiError, extractors::auth::AuthUser, routes::parse_oid, state::AppState};

// ---- GET /api/workspace/{workspace_id}/preference ------------------------

/// Returns the caller's preferences, creating defaults on first access.
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<Preferences>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let prefs = state
        .preferences
        .get_or_create(auth.user_id, workspace_id)
        .await?;
    Ok(Json(prefs))
}

// ---- PUT /api/workspace/{workspace_id}/preference ------------------------

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
    Json(body): Json<PreferencesUpdate>,
) -> Result<Json<Preferences>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let prefs = state
        .preferences
        .update(auth.user_id, workspace_id, body)
        .await?;
    Ok(Json(prefs))
}

// ---- GET /api/workspace/{workspace_id}/preference/quiet-hours ------------

/// Whether the caller is currently inside their quiet-hours window, and
/// when it ends.
pub async fn quiet_hours_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<QuietHoursStatus>, ApiError> {
    let workspace_id = parse_oid(&workspace_id)?;
    let prefs = state
        .preferences
        .get_or_create(auth.user_id, workspace_id)
        .await?;
    Ok(Json(state.quiet_hours.status(&prefs.quiet_hours)))
}
