//! Per-room sequence numbers.

use std::sync::Arc;

use crate::db::kv::KeyValueStore;
use crate::error::ApiError;

/// Hands out strictly increasing sequence numbers per live room. The counter
/// lives in the shared store so every gateway process draws from it.
#[derive(Clone)]
pub struct RoomSequencer {
    kv: Arc<dyn KeyValueStore>,
    ttl_secs: u64,
}

impl RoomSequencer {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    pub fn key(room_id: &str) -> String {
        format!("live:{room_id}:seq")
    }

    pub async fn next(&self, room_id: &str) -> Result<u64, ApiError> {
        let value = self.kv.incr(&Self::key(room_id), self.ttl_secs).await?;
        Ok(value.max(0) as u64)
    }
}
