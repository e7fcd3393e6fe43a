use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// The exhaustive event taxonomy produced by trigger handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StoryCompleted,
    TaskCompleted,
    DeploymentSucceeded,
    DeploymentFailed,
    DeploymentPendingApproval,
    AgentError,
    AgentMessage,
    ContextHealthChanged,
    CostAlert,
    SprintReviewReady,
}

impl EventType {
    /// Fixed critical subset: cannot be disabled by preferences and
    /// always bypasses quiet hours.
    pub const CRITICAL: [EventType; 2] = [EventType::DeploymentFailed, EventType::AgentError];

    /// Types eligible for folding into a `<type>_batch` summary.
    pub const CONSOLIDATABLE: [EventType; 3] = [
        EventType::StoryCompleted,
        EventType::TaskCompleted,
        EventType::AgentMessage,
    ];

    pub fn is_critical(&self) -> bool {
        Self::CRITICAL.contains(self)
    }

    pub fn is_consolidatable(&self) -> bool {
        Self::CONSOLIDATABLE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StoryCompleted => "story_completed",
            EventType::TaskCompleted => "task_completed",
            EventType::DeploymentSucceeded => "deployment_succeeded",
            EventType::DeploymentFailed => "deployment_failed",
            EventType::DeploymentPendingApproval => "deployment_pending_approval",
            EventType::AgentError => "agent_error",
            EventType::AgentMessage => "agent_message",
            EventType::ContextHealthChanged => "context_health_changed",
            EventType::CostAlert => "cost_alert",
            EventType::SprintReviewReady => "sprint_review_ready",
        }
    }

    /// Human-readable label used in digests and fallback titles.
    pub fn label(&self) -> &'static str {
        match self {
            EventType::StoryCompleted => "Story completed",
            EventType::TaskCompleted => "Task completed",
            EventType::DeploymentSucceeded => "Deployment succeeded",
            EventType::DeploymentFailed => "Deployment failed",
            EventType::DeploymentPendingApproval => "Deployment pending approval",
            EventType::AgentError => "Agent error",
            EventType::AgentMessage => "Agent message",
            EventType::ContextHealthChanged => "Context health changed",
            EventType::CostAlert => "Cost alert",
            EventType::SprintReviewReady => "Sprint review ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: ObjectId,
    pub workspace_id: ObjectId,
}

/// A normalized domain event handed to the dispatch orchestrator.
/// Immutable once dispatched; only its effects are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub notification_type: EventType,
    pub payload: serde_json::Value,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default = "default_batchable")]
    pub batchable: bool,
}

fn default_batchable() -> bool {
    true
}

impl NotificationEvent {
    pub fn new(
        notification_type: EventType,
        payload: serde_json::Value,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            notification_type,
            payload,
            recipients,
            urgency: Urgency::Normal,
            batchable: true,
        }
    }

    /// Critical types are immediate regardless of the batchable flag.
    pub fn is_immediate(&self) -> bool {
        self.notification_type.is_critical() || !self.batchable
    }

    /// Distinct workspaces among the recipients, first-seen order.
    pub fn distinct_workspaces(&self) -> Vec<ObjectId> {
        let mut seen = Vec::new();
        for recipient in &self.recipients {
            if !seen.contains(&recipient.workspace_id) {
                seen.push(recipient.workspace_id);
            }
        }
        seen
    }

    /// Copy of this event restricted to the given recipients.
    pub fn with_recipients(&self, recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            ..self.clone()
        }
    }

    /// Representative title pulled from the payload, falling back to the
    /// type label.
    pub fn title(&self) -> String {
        self.payload
            .get("title")
            .or_else(|| self.payload.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.notification_type.label().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_types_are_immediate_even_when_batchable() {
        for ty in EventType::CRITICAL {
            let event = NotificationEvent::new(ty, serde_json::json!({}), vec![]);
            assert!(event.batchable);
            assert!(event.is_immediate());
        }
    }

    #[test]
    fn non_batchable_events_are_immediate() {
        let mut event =
            NotificationEvent::new(EventType::CostAlert, serde_json::json!({}), vec![]);
        assert!(!event.is_immediate());
        event.batchable = false;
        assert!(event.is_immediate());
    }

    #[test]
    fn distinct_workspaces_preserves_first_seen_order() {
        let ws_a = ObjectId::new();
        let ws_b = ObjectId::new();
        let event = NotificationEvent::new(
            EventType::StoryCompleted,
            serde_json::json!({}),
            vec![
                Recipient { user_id: ObjectId::new(), workspace_id: ws_a },
                Recipient { user_id: ObjectId::new(), workspace_id: ws_b },
                Recipient { user_id: ObjectId::new(), workspace_id: ws_a },
            ],
        );
        assert_eq!(event.distinct_workspaces(), vec![ws_a, ws_b]);
    }

    #[test]
    fn wire_names_are_snake_case() {
        let json = serde_json::to_string(&EventType::DeploymentFailed).unwrap();
        assert_eq!(json, "\"deployment_failed\"");
    }
}
