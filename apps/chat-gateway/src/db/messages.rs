use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use parking_lot::Mutex;

use crate::db::pool::DbPool;
use crate::db::schema::chat_messages;
use crate::error::ApiError;
use crate::gateway::envelope::ChatEnvelope;
use crate::models::message::ChatMessage;

/// Durable message history.
///
/// Backed by Postgres in production and an in-memory map in tests.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a stamped message envelope. Saving the same id twice is a no-op.
    async fn save(&self, envelope: &ChatEnvelope) -> Result<(), ApiError>;
    /// Flag a stored message as pinned. Unknown ids are ignored.
    async fn mark_pinned(&self, message_id: &str) -> Result<(), ApiError>;
    /// Live messages in a room with `seq > after`, ascending, at most `limit`.
    async fn live_history_after(
        &self,
        room_id: &str,
        after: u64,
        limit: i64,
    ) -> Result<Vec<ChatEnvelope>, ApiError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn save(&self, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        let row = ChatMessage::from_envelope(envelope)?;
        let mut conn = self.pool.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(chat_messages::table)
                .values(&row)
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn mark_pinned(&self, message_id: &str) -> Result<(), ApiError> {
        let Ok(id) = message_id.parse::<i64>() else {
            return Ok(());
        };
        let mut conn = self.pool.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(chat_messages::table.find(id)).set(chat_messages::pinned.eq(true)),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn live_history_after(
        &self,
        room_id: &str,
        after: u64,
        limit: i64,
    ) -> Result<Vec<ChatEnvelope>, ApiError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<ChatMessage> = diesel_async::RunQueryDsl::load(
            chat_messages::table
                .filter(chat_messages::is_live.eq(true))
                .filter(chat_messages::live_stream_id.eq(room_id))
                .filter(chat_messages::seq.gt(after as i64))
                .order(chat_messages::seq.asc())
                .limit(limit)
                .select(ChatMessage::as_select()),
            &mut conn,
        )
        .await?;

        Ok(rows.into_iter().map(ChatMessage::into_envelope).collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<BTreeMap<i64, ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: i64) -> Option<ChatMessage> {
        self.rows.lock().get(&message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip every unread message addressed to `reader_id` in a match to read.
    /// Returns the ids that changed.
    pub fn mark_read(&self, match_id: &str, reader_id: &str) -> Vec<String> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        rows.values_mut()
            .filter(|m| {
                !m.is_read
                    && m.match_id.as_deref() == Some(match_id)
                    && m.receiver_id.as_deref() == Some(reader_id)
            })
            .map(|m| {
                m.is_read = true;
                m.read_at = Some(now);
                m.id.to_string()
            })
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        let row = ChatMessage::from_envelope(envelope)?;
        self.rows.lock().entry(row.id).or_insert(row);
        Ok(())
    }

    async fn mark_pinned(&self, message_id: &str) -> Result<(), ApiError> {
        if let Ok(id) = message_id.parse::<i64>() {
            if let Some(row) = self.rows.lock().get_mut(&id) {
                row.pinned = true;
            }
        }
        Ok(())
    }

    async fn live_history_after(
        &self,
        room_id: &str,
        after: u64,
        limit: i64,
    ) -> Result<Vec<ChatEnvelope>, ApiError> {
        let rows = self.rows.lock();
        let mut live: Vec<&ChatMessage> = rows
            .values()
            .filter(|m| {
                m.is_live
                    && m.live_stream_id.as_deref() == Some(room_id)
                    && m.seq.is_some_and(|s| s > after as i64)
            })
            .collect();
        live.sort_by_key(|m| m.seq);
        Ok(live
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .map(ChatMessage::into_envelope)
            .collect())
    }
}
