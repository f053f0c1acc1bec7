//! Per-room replay log.
//!
//! Stores `(sequence, envelope)` pairs with bounded retention by count and
//! age, and answers "everything after sequence N". Backed by a Redis stream
//! in production.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamRangeReply};
use redis::AsyncCommands;

use crate::error::ApiError;

use super::envelope::ChatEnvelope;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub sequence: u64,
    pub envelope: Arc<ChatEnvelope>,
}

#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append a sequenced envelope. Envelopes without a sequence are refused.
    async fn append(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError>;
    /// Retained entries with `sequence > after`, ascending.
    async fn read_after(&self, room_id: &str, after: u64) -> Result<Vec<LogEntry>, ApiError>;
}

pub fn history_key(room_id: &str) -> String {
    format!("live:{room_id}:history")
}

fn sequence_of(envelope: &ChatEnvelope) -> Result<u64, ApiError> {
    envelope
        .sequence()
        .ok_or_else(|| ApiError::bad_request("envelope has no sequence"))
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

pub struct MemoryAppendLog {
    rooms: DashMap<String, VecDeque<(Instant, LogEntry)>>,
    max_entries: usize,
    max_age: Duration,
}

impl MemoryAppendLog {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            max_entries: max_entries.max(1),
            max_age,
        }
    }

    fn prune(&self, log: &mut VecDeque<(Instant, LogEntry)>, now: Instant) {
        while log.len() > self.max_entries {
            log.pop_front();
        }
        while log
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) >= self.max_age)
        {
            log.pop_front();
        }
    }

    fn append_at(&self, room_id: &str, envelope: &ChatEnvelope, now: Instant) -> Result<(), ApiError> {
        let sequence = sequence_of(envelope)?;
        let mut log = self.rooms.entry(room_id.to_string()).or_default();
        log.push_back((
            now,
            LogEntry {
                sequence,
                envelope: Arc::new(envelope.clone()),
            },
        ));
        self.prune(&mut log, now);
        Ok(())
    }

    fn read_after_at(&self, room_id: &str, after: u64, now: Instant) -> Vec<LogEntry> {
        let Some(mut log) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        self.prune(&mut log, now);
        let mut entries: Vec<LogEntry> = log
            .iter()
            .filter(|(_, e)| e.sequence > after)
            .map(|(_, e)| e.clone())
            .collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }
}

#[async_trait]
impl AppendLog for MemoryAppendLog {
    async fn append(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        self.append_at(room_id, envelope, Instant::now())
    }

    async fn read_after(&self, room_id: &str, after: u64) -> Result<Vec<LogEntry>, ApiError> {
        Ok(self.read_after_at(room_id, after, Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// Redis stream implementation
// ---------------------------------------------------------------------------

/// One stream per room, `live:{room}:history`, with `seq` and `message`
/// fields. Trimmed approximately to `max_entries` on every append and
/// expired as a whole after `retention_secs` of inactivity.
pub struct RedisAppendLog {
    conn: ConnectionManager,
    max_entries: usize,
    retention_secs: u64,
}

impl RedisAppendLog {
    pub fn new(conn: ConnectionManager, max_entries: usize, retention_secs: u64) -> Self {
        Self {
            conn,
            max_entries: max_entries.max(1),
            retention_secs,
        }
    }
}

#[async_trait]
impl AppendLog for RedisAppendLog {
    async fn append(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        let sequence = sequence_of(envelope)?;
        let payload = serde_json::to_string(envelope)?;
        let key = history_key(room_id);

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .xadd_maxlen(
                &key,
                StreamMaxlen::Approx(self.max_entries),
                "*",
                &[("seq", sequence.to_string()), ("message", payload)],
            )
            .ignore()
            .expire(&key, self.retention_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_after(&self, room_id: &str, after: u64) -> Result<Vec<LogEntry>, ApiError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_all(history_key(room_id)).await?;

        let mut entries = Vec::new();
        for item in reply.ids {
            let Some(sequence) = item.get::<u64>("seq") else {
                continue;
            };
            if sequence <= after {
                continue;
            }
            let Some(message) = item.get::<String>("message") else {
                continue;
            };
            match serde_json::from_str::<ChatEnvelope>(&message) {
                Ok(envelope) => entries.push(LogEntry {
                    sequence,
                    envelope: Arc::new(envelope),
                }),
                Err(e) => {
                    tracing::warn!(?e, room_id, stream_id = %item.id, "skipping unreadable history entry");
                }
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }
}
