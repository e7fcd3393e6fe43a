use beacon_engine::event::{EventType, NotificationEvent};
use serde_json::json;

/// Embed colors per event family.
const COLOR_CRITICAL: u32 = 0xE74C3C;
const COLOR_SUCCESS: u32 = 0x2ECC71;
const COLOR_NEUTRAL: u32 = 0x5865F2;

fn event_color(ty: EventType) -> u32 {
    if ty.is_critical() {
        return COLOR_CRITICAL;
    }
    match ty {
        EventType::DeploymentSucceeded | EventType::StoryCompleted | EventType::TaskCompleted => {
            COLOR_SUCCESS
        }
        _ => COLOR_NEUTRAL,
    }
}

fn event_body(event: &NotificationEvent) -> String {
    event
        .payload
        .get("body")
        .or_else(|| event.payload.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Slack incoming-webhook payload: a section block per message with the
/// type label as context.
pub fn slack_message(event: &NotificationEvent) -> serde_json::Value {
    let title = event.title();
    let body = event_body(event);
    let text = if body.is_empty() {
        format!("*{title}*")
    } else {
        format!("*{title}*\n{body}")
    };

    json!({
        "text": title,
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": text }
            },
            {
                "type": "context",
                "elements": [
                    { "type": "mrkdwn", "text": event.notification_type.label() }
                ]
            }
        ]
    })
}

/// Discord webhook payload: one embed, color-coded by event family.
pub fn discord_message(event: &NotificationEvent) -> serde_json::Value {
    json!({
        "embeds": [
            {
                "title": event.title(),
                "description": event_body(event),
                "color": event_color(event.notification_type),
                "footer": { "text": event.notification_type.label() }
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_engine::event::EventType;

    fn event(ty: EventType, payload: serde_json::Value) -> NotificationEvent {
        NotificationEvent::new(ty, payload, vec![])
    }

    #[test]
    fn slack_message_carries_title_and_body() {
        let msg = slack_message(&event(
            EventType::DeploymentFailed,
            json!({"title": "api-server", "body": "build step failed"}),
        ));
        assert_eq!(msg["text"], "api-server");
        assert!(
            msg["blocks"][0]["text"]["text"]
                .as_str()
                .unwrap()
                .contains("build step failed")
        );
    }

    #[test]
    fn discord_critical_events_are_red() {
        let msg = discord_message(&event(EventType::AgentError, json!({"title": "agent-3"})));
        assert_eq!(msg["embeds"][0]["color"], COLOR_CRITICAL);
    }

    #[test]
    fn missing_body_falls_back_to_title_only() {
        let msg = slack_message(&event(EventType::CostAlert, json!({})));
        assert_eq!(msg["text"], "Cost alert");
        assert!(!msg["blocks"][0]["text"]["text"].as_str().unwrap().contains('\n'));
    }
}
