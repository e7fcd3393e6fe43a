use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::error::EngineResult;
use crate::store::{KvStore, keys};

/// Trailing window over which sends per target are capped.
const WINDOW: Duration = Duration::from_secs(60);

/// Retention of the timestamp set, roughly 2x the window, so stale
/// targets garbage-collect themselves.
const RETENTION: Duration = Duration::from_secs(120);

/// Sliding-window call counter shared across instances, keyed per
/// outbound channel target (e.g. one webhook, one user's push stream).
/// This is a hard cap: unlike quiet hours there is no critical bypass.
///
/// The prune→count and prune→append sequences are two store operations
/// each; concurrent dispatchers can admit a small number of over-limit
/// sends. Known race, kept non-atomic on purpose.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Called before every external send. Prunes entries older than the
    /// window, then denies when the remaining count reaches the limit.
    pub async fn is_rate_limited(
        &self,
        target: &str,
        limit_per_minute: usize,
    ) -> EngineResult<bool> {
        let timestamps = self.window(target, Utc::now().timestamp_millis()).await?;
        Ok(timestamps.len() >= limit_per_minute)
    }

    /// Recorded only after a successful send; refreshes retention.
    pub async fn record_send(&self, target: &str) -> EngineResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let mut timestamps = self.window(target, now_ms).await?;
        timestamps.push(now_ms);
        let raw = serde_json::to_string(&timestamps)?;
        self.kv
            .set_ex(&keys::rate_limit(target), &raw, RETENTION)
            .await
    }

    /// Live timestamps within the trailing window. Corrupt or missing
    /// sets count as empty so the true count is never under-reported
    /// after pruning.
    async fn window(&self, target: &str, now_ms: i64) -> EngineResult<Vec<i64>> {
        let cutoff = now_ms - WINDOW.as_millis() as i64;
        let raw = self.kv.get(&keys::rate_limit(target)).await?;
        let timestamps: Vec<i64> = match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                warn!(%target, %error, "Corrupt rate-limit window, resetting");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(timestamps.into_iter().filter(|ts| *ts > cutoff).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn limiter() -> (RateLimiter, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (RateLimiter::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn denies_at_the_limit_and_allows_below() {
        let (limiter, _) = limiter();
        for _ in 0..29 {
            limiter.record_send("webhook-1").await.unwrap();
        }
        assert!(!limiter.is_rate_limited("webhook-1", 30).await.unwrap());

        limiter.record_send("webhook-1").await.unwrap();
        assert!(limiter.is_rate_limited("webhook-1", 30).await.unwrap());
    }

    #[tokio::test]
    async fn targets_are_independent() {
        let (limiter, _) = limiter();
        limiter.record_send("a").await.unwrap();
        assert!(limiter.is_rate_limited("a", 1).await.unwrap());
        assert!(!limiter.is_rate_limited("b", 1).await.unwrap());
    }

    #[tokio::test]
    async fn entries_older_than_the_window_are_pruned() {
        let (limiter, kv) = limiter();
        let now_ms = Utc::now().timestamp_millis();
        // 30 sends just past the window, one inside it.
        let mut stale: Vec<i64> = (0..30).map(|i| now_ms - 61_000 - i).collect();
        stale.push(now_ms - 1_000);
        kv.set_ex(
            &keys::rate_limit("webhook-1"),
            &serde_json::to_string(&stale).unwrap(),
            RETENTION,
        )
        .await
        .unwrap();

        assert!(!limiter.is_rate_limited("webhook-1", 30).await.unwrap());
        // Recording prunes too: the set collapses to the live entries.
        limiter.record_send("webhook-1").await.unwrap();
        let raw = kv.get(&keys::rate_limit("webhook-1")).await.unwrap().unwrap();
        let kept: Vec<i64> = serde_json::from_str(&raw).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_window_resets_to_empty() {
        let (limiter, kv) = limiter();
        kv.set_ex(&keys::rate_limit("webhook-1"), "not json", RETENTION)
            .await
            .unwrap();
        assert!(!limiter.is_rate_limited("webhook-1", 1).await.unwrap());
    }
}
