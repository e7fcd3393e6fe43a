use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use bson::oid::ObjectId;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use beacon_engine::dedup::derive_interaction_id;

use crate::{error::ApiError, state::AppState};

/// Replay window for the request timestamp, per Slack's guidance.
const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct InteractionForm {
    payload: String,
}

/// The subset of Slack's interaction payload we act on.
#[derive(Debug, Deserialize)]
struct InteractionPayload {
    trigger_id: Option<String>,
    #[serde(default)]
    actions: Vec<InteractionAction>,
}

#[derive(Debug, Deserialize)]
struct InteractionAction {
    action_id: String,
    value: Option<String>,
}

/// Context we embed in the button `value` when posting interactive
/// messages.
#[derive(Debug, Deserialize)]
struct ActionContext {
    workspace_id: ObjectId,
    user_id: ObjectId,
}

/// Verifies Slack's `v0` request signature over the raw body.
/// Basestring is `v0:{timestamp}:{body}` keyed with the signing secret.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    sig_header: &str,
) -> Result<(), ApiError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ApiError::Unauthorized("Invalid request timestamp".to_string()))?;
    if (Utc::now().timestamp() - ts).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return Err(ApiError::Unauthorized(
            "Request timestamp outside the allowed window".to_string(),
        ));
    }

    let basestring = format!("v0:{timestamp}:{}", String::from_utf8_lossy(body));

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| ApiError::Unauthorized("Invalid signing secret".to_string()))?;
    mac.update(basestring.as_bytes());
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    if expected == sig_header {
        Ok(())
    } else {
        Err(ApiError::Unauthorized(
            "Invalid request signature".to_string(),
        ))
    }
}

// ---- POST /api/interaction/slack -----------------------------------------

/// Inbound Slack interactivity callback (button clicks). Signature
/// checked against the raw body before anything is parsed; redeliveries
/// inside the dedup TTL are acknowledged without re-processing.
pub async fn slack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(signing_secret) = state.settings.slack.signing_secret.as_deref() else {
        return Err(ApiError::Unauthorized(
            "Slack interactions are not configured".to_string(),
        ));
    };

    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing request timestamp".to_string()))?;
    let signature = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing request signature".to_string()))?;

    verify_slack_signature(signing_secret, timestamp, &body, signature)?;

    let form: InteractionForm = serde_urlencoded::from_bytes(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid form body: {e}")))?;
    let payload: InteractionPayload = serde_json::from_str(&form.payload)
        .map_err(|e| ApiError::BadRequest(format!("Invalid interaction payload: {e}")))?;

    let Some(action) = payload.actions.first() else {
        return Ok(Json(serde_json::json!({})));
    };

    let context = action
        .value
        .as_deref()
        .and_then(|v| serde_json::from_str::<ActionContext>(v).ok());

    let interaction_id = match (&payload.trigger_id, &context) {
        (Some(id), _) if !id.is_empty() => id.clone(),
        (_, Some(ctx)) => derive_interaction_id(
            None,
            ctx.workspace_id,
            ctx.user_id,
            &action.action_id,
            Utc::now(),
        ),
        (_, None) => {
            return Err(ApiError::BadRequest(
                "Interaction carries no trigger_id or action context".to_string(),
            ));
        }
    };

    if state.dedup.is_duplicate(&interaction_id).await? {
        info!(%interaction_id, "Dropping duplicate interaction delivery");
        return Ok(Json(serde_json::json!({})));
    }
    state.dedup.mark_seen(&interaction_id).await?;

    match context {
        Some(ctx) => info!(
            action = %action.action_id,
            workspace_id = %ctx.workspace_id,
            user_id = %ctx.user_id,
            "Recorded interaction"
        ),
        None => warn!(action = %action.action_id, "Interaction without action context"),
    }

    Ok(Json(serde_json::json!({
        "response_type": "ephemeral",
        "replace_original": false,
        "text": format!("Got it, {} recorded.", action.action_id),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let basestring = format!("v0:{timestamp}:{}", String::from_utf8_lossy(body));
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(basestring.as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_correctly_signed_request() {
        let ts = Utc::now().timestamp().to_string();
        let body = b"payload=%7B%22type%22%3A%22block_actions%22%7D";
        let sig = sign("secret", &ts, body);
        assert!(verify_slack_signature("secret", &ts, body, &sig).is_ok());
    }

    #[test]
    fn rejects_a_tampered_body() {
        let ts = Utc::now().timestamp().to_string();
        let sig = sign("secret", &ts, b"payload=original");
        assert!(verify_slack_signature("secret", &ts, b"payload=tampered", &sig).is_err());
    }

    #[test]
    fn rejects_a_wrong_secret() {
        let ts = Utc::now().timestamp().to_string();
        let sig = sign("other-secret", &ts, b"payload=x");
        assert!(verify_slack_signature("secret", &ts, b"payload=x", &sig).is_err());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let ts = (Utc::now().timestamp() - 600).to_string();
        let sig = sign("secret", &ts, b"payload=x");
        assert!(verify_slack_signature("secret", &ts, b"payload=x", &sig).is_err());
    }
}
