//! Shared presence state: per-user online flags, per-room viewer counts and
//! pinned messages.
//!
//! Everything lives in the key-value store with a TTL, so it is visible to
//! every gateway process and the HTTP endpoints. Only the hub mutates
//! presence and viewer counts (on register/unregister).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::kv::KeyValueStore;
use crate::error::ApiError;

use super::envelope::ChatEnvelope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Presence {
    kv: Arc<dyn KeyValueStore>,
    ttl_secs: u64,
}

impl Presence {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    fn user_key(user_id: &str) -> String {
        format!("presence:{user_id}")
    }

    fn viewers_key(room_id: &str) -> String {
        format!("live:{room_id}:viewers")
    }

    fn pinned_key(room_id: &str) -> String {
        format!("live:{room_id}:pinned")
    }

    // -- online / offline -------------------------------------------------

    pub async fn mark_online(&self, user_id: &str) -> Result<(), ApiError> {
        self.write_status(user_id, true).await
    }

    pub async fn mark_offline(&self, user_id: &str) -> Result<(), ApiError> {
        self.write_status(user_id, false).await
    }

    async fn write_status(&self, user_id: &str, online: bool) -> Result<(), ApiError> {
        let record = PresenceRecord {
            online,
            last_seen_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)?;
        self.kv
            .set_ex(&Self::user_key(user_id), &json, self.ttl_secs)
            .await
    }

    /// `None` if the user has not been seen within the TTL.
    pub async fn status(&self, user_id: &str) -> Result<Option<PresenceRecord>, ApiError> {
        let Some(raw) = self.kv.get(&Self::user_key(user_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    // -- viewer counts ----------------------------------------------------

    /// Count a join and refresh the room TTL. Returns the new count.
    pub async fn join_room(&self, room_id: &str) -> Result<i64, ApiError> {
        self.kv.incr(&Self::viewers_key(room_id), self.ttl_secs).await
    }

    /// Count a leave, never going below zero. Returns the new count.
    pub async fn leave_room(&self, room_id: &str) -> Result<i64, ApiError> {
        self.kv.decr_floor(&Self::viewers_key(room_id)).await
    }

    pub async fn viewer_count(&self, room_id: &str) -> Result<i64, ApiError> {
        let raw = self.kv.get(&Self::viewers_key(room_id)).await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0))
    }

    // -- pinned message ---------------------------------------------------

    /// Overwrite the room's pinned message.
    pub async fn set_pinned(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        let json = serde_json::to_string(envelope)?;
        self.kv
            .set_ex(&Self::pinned_key(room_id), &json, self.ttl_secs)
            .await
    }

    pub async fn clear_pinned(&self, room_id: &str) -> Result<(), ApiError> {
        self.kv.del(&Self::pinned_key(room_id)).await
    }

    pub async fn pinned(&self, room_id: &str) -> Result<Option<ChatEnvelope>, ApiError> {
        let Some(raw) = self.kv.get(&Self::pinned_key(room_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::warn!(?e, room_id, "discarding unreadable pinned message");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;
    use crate::gateway::envelope::{ChatEvent, ChatMode, PinBody};

    fn presence() -> Presence {
        Presence::new(Arc::new(MemoryStore::new()), 60)
    }

    #[tokio::test]
    async fn online_then_offline() {
        let p = presence();
        assert_eq!(p.status("u1").await.unwrap(), None);

        p.mark_online("u1").await.unwrap();
        assert!(p.status("u1").await.unwrap().unwrap().online);

        p.mark_offline("u1").await.unwrap();
        let rec = p.status("u1").await.unwrap().unwrap();
        assert!(!rec.online);
        assert!(rec.last_seen_at <= Utc::now());
    }

    #[tokio::test]
    async fn viewer_count_is_joins_minus_leaves() {
        let p = presence();
        for _ in 0..5 {
            p.join_room("r1").await.unwrap();
        }
        for _ in 0..2 {
            p.leave_room("r1").await.unwrap();
        }
        assert_eq!(p.viewer_count("r1").await.unwrap(), 3);
        assert_eq!(p.viewer_count("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn viewer_count_never_goes_negative() {
        let p = presence();
        p.join_room("r1").await.unwrap();
        for _ in 0..4 {
            p.leave_room("r1").await.unwrap();
        }
        assert_eq!(p.viewer_count("r1").await.unwrap(), 0);
        assert_eq!(p.join_room("r1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn later_pin_overwrites_and_clear_removes() {
        let p = presence();
        let pin = |text: &str| {
            ChatEnvelope::new(
                ChatMode::Live,
                "r1",
                ChatEvent::Pin(PinBody {
                    content: text.to_string(),
                    pinned: true,
                }),
            )
        };

        p.set_pinned("r1", &pin("first")).await.unwrap();
        p.set_pinned("r1", &pin("second")).await.unwrap();
        let current = p.pinned("r1").await.unwrap().unwrap();
        match current.event {
            ChatEvent::Pin(body) => assert_eq!(body.content, "second"),
            other => panic!("unexpected pinned event: {other:?}"),
        }

        p.clear_pinned("r1").await.unwrap();
        assert_eq!(p.pinned("r1").await.unwrap(), None);
    }
}
