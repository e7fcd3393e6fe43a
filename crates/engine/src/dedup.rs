use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::store::{KvStore, keys};

const DEDUP_TTL: Duration = Duration::from_secs(60);

/// Guards inbound interactive webhook callbacks (button clicks, slash
/// commands) against duplicate delivery by the upstream provider.
///
/// Check-then-set over the shared store, not atomic: two instances
/// racing on the same interaction can both pass. Known race, accepted.
pub struct InteractionDeduplicator {
    kv: Arc<dyn KvStore>,
}

impl InteractionDeduplicator {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn is_duplicate(&self, interaction_id: &str) -> EngineResult<bool> {
        Ok(self.kv.get(&keys::dedup(interaction_id)).await?.is_some())
    }

    /// Set before the handler runs so a provider redelivery inside the
    /// TTL is dropped.
    pub async fn mark_seen(&self, interaction_id: &str) -> EngineResult<()> {
        self.kv
            .set_ex(&keys::dedup(interaction_id), "1", DEDUP_TTL)
            .await
    }
}

/// Provider-supplied trigger/callback id when present, otherwise a
/// composite of workspace, user, action and a minute-coarse timestamp.
pub fn derive_interaction_id(
    provider_id: Option<&str>,
    workspace_id: ObjectId,
    user_id: ObjectId,
    action: &str,
    now: DateTime<Utc>,
) -> String {
    match provider_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!(
            "{}:{}:{}:{}",
            workspace_id.to_hex(),
            user_id.to_hex(),
            action,
            now.timestamp() / 60
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn second_sighting_within_ttl_is_a_duplicate() {
        let dedup = InteractionDeduplicator::new(Arc::new(MemoryKvStore::new()));
        assert!(!dedup.is_duplicate("trigger-123").await.unwrap());
        dedup.mark_seen("trigger-123").await.unwrap();
        assert!(dedup.is_duplicate("trigger-123").await.unwrap());
        assert!(!dedup.is_duplicate("trigger-456").await.unwrap());
    }

    #[test]
    fn composite_id_is_minute_coarse() {
        let ws = ObjectId::new();
        let user = ObjectId::new();
        let t0 = DateTime::from_timestamp(1_700_000_040, 0).unwrap();
        let t1 = DateTime::from_timestamp(1_700_000_059, 0).unwrap();
        let t2 = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let a = derive_interaction_id(None, ws, user, "approve", t0);
        let b = derive_interaction_id(None, ws, user, "approve", t1);
        let c = derive_interaction_id(None, ws, user, "approve", t2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn provider_id_wins_when_present() {
        let id = derive_interaction_id(
            Some("cb-1"),
            ObjectId::new(),
            ObjectId::new(),
            "approve",
            Utc::now(),
        );
        assert_eq!(id, "cb-1");
    }
}
