use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::EngineResult;
use crate::event::{EventType, NotificationEvent};
use crate::store::{KvStore, keys};

/// Buffer TTL, refreshed on every append so an active buffer never
/// silently expires mid-accumulation.
const BATCH_TTL: Duration = Duration::from_secs(1800);

/// Cap on representative titles carried by a consolidated summary.
const SAMPLE_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedNotification {
    pub notification_type: EventType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub workspace_id: ObjectId,
}

/// Result of folding a batch: either one `<type>_batch` summary or an
/// original notification passed through unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedNotification {
    pub notification_type: String,
    pub payload: serde_json::Value,
    pub workspace_id: ObjectId,
}

/// Per-recipient accumulation buffer for batchable events.
pub struct BatchQueue {
    kv: Arc<dyn KvStore>,
}

impl BatchQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Appends one entry per recipient. A failure for one recipient is
    /// logged and does not block the others.
    pub async fn queue(&self, event: &NotificationEvent) -> EngineResult<()> {
        let now = Utc::now();
        for recipient in &event.recipients {
            let batched = BatchedNotification {
                notification_type: event.notification_type,
                payload: event.payload.clone(),
                timestamp: now,
                workspace_id: recipient.workspace_id,
            };
            let raw = serde_json::to_string(&batched)?;
            if let Err(err) = self
                .kv
                .list_append(&keys::batch(&recipient.user_id), &raw, BATCH_TTL)
                .await
            {
                error!(
                    user_id = %recipient.user_id,
                    notification_type = event.notification_type.as_str(),
                    error = %err,
                    "Failed to queue notification for batching"
                );
            }
        }
        Ok(())
    }

    /// Atomically reads and clears the user's buffer. Missing buffer
    /// yields an empty vec, never an error; corrupt entries are dropped.
    pub async fn flush(&self, user_id: ObjectId) -> EngineResult<Vec<BatchedNotification>> {
        let raw_items = self.kv.list_take(&keys::batch(&user_id)).await?;
        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            match serde_json::from_str::<BatchedNotification>(&raw) {
                Ok(item) => items.push(item),
                Err(error) => warn!(%user_id, %error, "Dropping corrupt batched notification"),
            }
        }
        Ok(items)
    }

    pub async fn len(&self, user_id: ObjectId) -> EngineResult<usize> {
        self.kv.list_len(&keys::batch(&user_id)).await
    }

    /// Users with a non-empty buffer, for the periodic sweep.
    pub async fn users_with_batches(&self) -> EngineResult<Vec<ObjectId>> {
        let mut users = Vec::new();
        for key in self.kv.scan_keys(keys::BATCH_PREFIX).await? {
            let Some(hex) = key.strip_prefix(keys::BATCH_PREFIX) else {
                continue;
            };
            if let Ok(user_id) = ObjectId::parse_str(hex) {
                users.push(user_id);
            }
        }
        Ok(users)
    }

    /// Groups by type in first-seen order. Consolidatable groups of
    /// size > 1 fold into one `<type>_batch` item carrying the count and
    /// a deduplicated title sample; everything else passes through
    /// unchanged. Immediate types never reach this point (the
    /// orchestrator routes around the batch queue).
    pub fn consolidate(&self, items: Vec<BatchedNotification>) -> Vec<ConsolidatedNotification> {
        let mut groups: Vec<(EventType, Vec<BatchedNotification>)> = Vec::new();
        for item in items {
            match groups
                .iter_mut()
                .find(|(ty, _)| *ty == item.notification_type)
            {
                Some((_, group)) => group.push(item),
                None => groups.push((item.notification_type, vec![item])),
            }
        }

        let mut consolidated = Vec::new();
        for (ty, group) in groups {
            if ty.is_consolidatable() && group.len() > 1 {
                let workspace_id = group[0].workspace_id;
                let mut titles: Vec<String> = Vec::new();
                for item in &group {
                    if let Some(title) = item
                        .payload
                        .get("title")
                        .or_else(|| item.payload.get("name"))
                        .and_then(|v| v.as_str())
                        && !titles.iter().any(|t| t == title)
                    {
                        titles.push(title.to_string());
                    }
                    if titles.len() >= SAMPLE_LIMIT {
                        break;
                    }
                }
                consolidated.push(ConsolidatedNotification {
                    notification_type: format!("{}_batch", ty.as_str()),
                    payload: serde_json::json!({
                        "count": group.len(),
                        "titles": titles,
                    }),
                    workspace_id,
                });
            } else {
                for item in group {
                    consolidated.push(ConsolidatedNotification {
                        notification_type: ty.as_str().to_string(),
                        payload: item.payload,
                        workspace_id: item.workspace_id,
                    });
                }
            }
        }
        consolidated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Recipient;
    use crate::store::MemoryKvStore;

    fn queue() -> BatchQueue {
        BatchQueue::new(Arc::new(MemoryKvStore::new()))
    }

    fn batched(ty: EventType, payload: serde_json::Value) -> BatchedNotification {
        BatchedNotification {
            notification_type: ty,
            payload,
            timestamp: Utc::now(),
            workspace_id: ObjectId::new(),
        }
    }

    #[tokio::test]
    async fn queue_appends_per_recipient_and_flush_clears() {
        let queue = queue();
        let ws = ObjectId::new();
        let alice = Recipient { user_id: ObjectId::new(), workspace_id: ws };
        let bob = Recipient { user_id: ObjectId::new(), workspace_id: ws };
        let event = NotificationEvent::new(
            EventType::StoryCompleted,
            serde_json::json!({"title": "Login page"}),
            vec![alice, bob],
        );

        queue.queue(&event).await.unwrap();
        queue.queue(&event).await.unwrap();

        assert_eq!(queue.len(alice.user_id).await.unwrap(), 2);
        assert_eq!(queue.len(bob.user_id).await.unwrap(), 2);

        let flushed = queue.flush(alice.user_id).await.unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(queue.len(alice.user_id).await.unwrap(), 0);
        // Bob's buffer is untouched.
        assert_eq!(queue.len(bob.user_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn flush_of_missing_buffer_is_empty_not_an_error() {
        let queue = queue();
        assert!(queue.flush(ObjectId::new()).await.unwrap().is_empty());
    }

    #[test]
    fn consolidates_same_type_groups_with_count() {
        let queue = queue();
        let items = vec![
            batched(EventType::StoryCompleted, serde_json::json!({"title": "A"})),
            batched(EventType::StoryCompleted, serde_json::json!({"title": "B"})),
            batched(EventType::StoryCompleted, serde_json::json!({"title": "A"})),
        ];
        let out = queue.consolidate(items);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].notification_type, "story_completed_batch");
        assert_eq!(out[0].payload["count"], 3);
        let titles: Vec<&str> = out[0].payload["titles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t.as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn single_item_passes_through_with_type_unaltered() {
        let queue = queue();
        let items = vec![batched(
            EventType::StoryCompleted,
            serde_json::json!({"title": "Solo"}),
        )];
        let out = queue.consolidate(items);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].notification_type, "story_completed");
        assert_eq!(out[0].payload["title"], "Solo");
    }

    #[test]
    fn non_consolidatable_types_pass_through() {
        let queue = queue();
        let items = vec![
            batched(EventType::CostAlert, serde_json::json!({"amount": 10})),
            batched(EventType::CostAlert, serde_json::json!({"amount": 20})),
        ];
        let out = queue.consolidate(items);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.notification_type == "cost_alert"));
    }

    #[test]
    fn mixed_types_yield_one_item_per_group() {
        let queue = queue();
        let items = vec![
            batched(EventType::StoryCompleted, serde_json::json!({"title": "A"})),
            batched(EventType::TaskCompleted, serde_json::json!({"title": "T1"})),
            batched(EventType::StoryCompleted, serde_json::json!({"title": "B"})),
            batched(EventType::TaskCompleted, serde_json::json!({"title": "T2"})),
        ];
        let out = queue.consolidate(items);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].notification_type, "story_completed_batch");
        assert_eq!(out[0].payload["count"], 2);
        assert_eq!(out[1].notification_type, "task_completed_batch");
        assert_eq!(out[1].payload["count"], 2);
    }
}
