use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use beacon_engine::store::KvStore;
use beacon_engine::{EngineError, EngineResult};

/// Redis-backed shared store. Every engine instance points at the same
/// Redis, which is what makes batch buffers, quiet-hours holds and rate
/// limit windows visible across instances.
#[derive(Clone)]
pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(store_err)?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn store_err(error: redis::RedisError) -> EngineError {
    EngineError::Store(error.to_string())
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        self.conn().get(key).await.map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()> {
        self.conn()
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(store_err)
    }

    async fn del(&self, key: &str) -> EngineResult<()> {
        self.conn().del::<_, ()>(key).await.map_err(store_err)
    }

    async fn list_append(&self, key: &str, value: &str, ttl: Duration) -> EngineResult<()> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .rpush(key, value)
            .ignore()
            .expire(key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_err)
    }

    async fn list_len(&self, key: &str) -> EngineResult<usize> {
        self.conn().llen(key).await.map_err(store_err)
    }

    async fn list_take(&self, key: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.conn();
        let (items, _): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(key, 0, -1)
            .del(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(items)
    }

    async fn scan_keys(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(store_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
