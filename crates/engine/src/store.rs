use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::EngineResult;

/// Shared key-value store with TTL semantics. All cross-instance state
/// (batch buffers, quiet-hours holds, rate-limit windows, dedup records,
/// cached preferences) lives behind this seam so the engine can run as
/// multiple stateless instances. Values are JSON strings; callers treat
/// malformed payloads as cache misses, never as fatal errors.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()>;

    async fn del(&self, key: &str) -> EngineResult<()>;

    /// Append to a list, refreshing the whole list's TTL.
    async fn list_append(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()>;

    async fn list_len(&self, key: &str) -> EngineResult<usize>;

    /// Read and clear a list. Missing key yields an empty vec.
    async fn list_take(&self, key: &str) -> EngineResult<Vec<String>>;

    /// All live keys starting with `prefix`.
    async fn scan_keys(&self, prefix: &str) -> EngineResult<Vec<String>>;
}

/// Key namespaces shared by every store backend.
pub mod keys {
    use bson::oid::ObjectId;

    pub fn batch(user_id: &ObjectId) -> String {
        format!("batch:{}", user_id.to_hex())
    }

    pub const BATCH_PREFIX: &str = "batch:";

    pub fn quiet_hours(user_id: &ObjectId, timestamp_ms: i64) -> String {
        format!("quiet-hours:{}:{}", user_id.to_hex(), timestamp_ms)
    }

    pub fn quiet_hours_prefix(user_id: &ObjectId) -> String {
        format!("quiet-hours:{}:", user_id.to_hex())
    }

    pub const QUIET_HOURS_PREFIX: &str = "quiet-hours:";

    pub fn rate_limit(target: &str) -> String {
        format!("rate-limit:{target}")
    }

    pub fn dedup(interaction_id: &str) -> String {
        format!("dedup:{interaction_id}")
    }

    pub fn preferences(user_id: &ObjectId, workspace_id: &ObjectId) -> String {
        format!("prefs:{}:{}", workspace_id.to_hex(), user_id.to_hex())
    }
}

enum EntryValue {
    Value(String),
    List(Vec<String>),
}

struct Entry {
    value: EntryValue,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process `KvStore` backed by a `DashMap` with lazy TTL expiry.
/// Used by unit tests and single-instance deployments; production runs
/// the Redis implementation.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, key: &str) {
        if let Some(entry) = self.entries.get(key)
            && entry.is_expired()
        {
            drop(entry);
            self.entries.remove(key);
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        self.purge_expired(key);
        Ok(self.entries.get(key).and_then(|e| match &e.value {
            EntryValue::Value(v) => Some(v.clone()),
            EntryValue::List(_) => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: EntryValue::Value(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> EngineResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_append(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()> {
        self.purge_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: EntryValue::List(Vec::new()),
            expires_at: Instant::now() + ttl,
        });
        match &mut entry.value {
            EntryValue::List(items) => items.push(value.to_string()),
            EntryValue::Value(_) => {
                entry.value = EntryValue::List(vec![value.to_string()]);
            }
        }
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn list_len(&self, key: &str) -> EngineResult<usize> {
        self.purge_expired(key);
        Ok(self
            .entries
            .get(key)
            .map(|e| match &e.value {
                EntryValue::List(items) => items.len(),
                EntryValue::Value(_) => 0,
            })
            .unwrap_or(0))
    }

    async fn list_take(&self, key: &str) -> EngineResult<Vec<String>> {
        self.purge_expired(key);
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| match e.value {
                EntryValue::List(items) => items,
                EntryValue::Value(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn scan_keys(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
