use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::ApiError;

/// Abstraction over the shared key-value store holding room counters,
/// pinned messages and presence records.
///
/// Backed by Redis in production and an in-memory map in tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ApiError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ApiError>;
    async fn del(&self, key: &str) -> Result<(), ApiError>;
    /// Atomically increment and refresh the key's TTL. Returns the new value.
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, ApiError>;
    /// Atomically decrement, never going below zero. Returns the new value.
    async fn decr_floor(&self, key: &str) -> Result<i64, ApiError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_int(data: &HashMap<String, Entry>, key: &str, now: Instant) -> i64 {
        data.get(key)
            .filter(|e| e.live(now))
            .and_then(|e| e.value.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ApiError> {
        self.data.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if entry.live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<(), ApiError> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, ApiError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let next = Self::current_int(&data, key, now) + 1;
        data.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(next)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, ApiError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let current = Self::current_int(&data, key, now);
        if current <= 0 {
            return Ok(0);
        }
        let next = current - 1;
        if let Some(entry) = data.get_mut(key) {
            entry.value = next.to_string();
        }
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

const DECR_FLOOR_LUA: &str = r"
local v = tonumber(redis.call('GET', KEYS[1]) or '0')
if v <= 0 then
  return 0
end
return redis.call('DECR', KEYS[1])
";

/// Redis-backed store. The connection manager reconnects on its own and is
/// cheap to clone per command.
pub struct RedisStore {
    conn: ConnectionManager,
    decr_floor: redis::Script,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            decr_floor: redis::Script::new(DECR_FLOOR_LUA),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        let value: i64 = self.decr_floor.key(key).invoke_async(&mut conn).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_are_invisible() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n", 60).await.unwrap(), 1);
        assert_eq!(store.incr("n", 60).await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn decr_floor_clamps_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.decr_floor("n").await.unwrap(), 0);
        store.incr("n", 60).await.unwrap();
        assert_eq!(store.decr_floor("n").await.unwrap(), 0);
        assert_eq!(store.decr_floor("n").await.unwrap(), 0);
        assert_eq!(store.incr("n", 60).await.unwrap(), 1);
    }
}
