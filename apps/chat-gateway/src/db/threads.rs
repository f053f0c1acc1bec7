use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use diesel::prelude::*;
use parking_lot::Mutex;

use crate::db::messages::MemoryMessageStore;
use crate::db::pool::DbPool;
use crate::db::schema::{blocks, chat_messages, matches};
use crate::error::ApiError;
use crate::models::chat_match::ChatMatch;

/// Match-thread lookups needed to route private chat.
#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    /// The other participant of an active match, or `None` if the match is
    /// unknown, inactive, or `sender_id` isn't part of it.
    async fn resolve_other_party(
        &self,
        match_id: &str,
        sender_id: &str,
    ) -> Result<Option<String>, ApiError>;
    /// True if either user has blocked the other.
    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool, ApiError>;
    /// Mark every unread message addressed to `reader_id` in the match as
    /// read. Returns the affected message ids.
    async fn mark_read(&self, match_id: &str, reader_id: &str) -> Result<Vec<String>, ApiError>;
}

const ACTIVE: &str = "active";

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgThreadDirectory {
    pool: DbPool,
}

impl PgThreadDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadDirectory for PgThreadDirectory {
    async fn resolve_other_party(
        &self,
        match_id: &str,
        sender_id: &str,
    ) -> Result<Option<String>, ApiError> {
        let mut conn = self.pool.get().await?;

        let found: Option<ChatMatch> = diesel_async::RunQueryDsl::get_result(
            matches::table
                .find(match_id)
                .filter(matches::status.eq(ACTIVE))
                .select(ChatMatch::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(found.and_then(|m| m.other_party(sender_id).map(str::to_string)))
    }

    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;

        let blocked: bool = diesel_async::RunQueryDsl::get_result(
            diesel::select(diesel::dsl::exists(
                blocks::table.filter(
                    blocks::blocker_id
                        .eq(a)
                        .and(blocks::blocked_id.eq(b))
                        .or(blocks::blocker_id.eq(b).and(blocks::blocked_id.eq(a))),
                ),
            )),
            &mut conn,
        )
        .await?;
        Ok(blocked)
    }

    async fn mark_read(&self, match_id: &str, reader_id: &str) -> Result<Vec<String>, ApiError> {
        let mut conn = self.pool.get().await?;

        let ids: Vec<i64> = diesel_async::RunQueryDsl::load(
            diesel::update(
                chat_messages::table
                    .filter(chat_messages::match_id.eq(match_id))
                    .filter(chat_messages::receiver_id.eq(reader_id))
                    .filter(chat_messages::is_read.eq(false)),
            )
            .set((
                chat_messages::is_read.eq(true),
                chat_messages::read_at.eq(Some(Utc::now())),
            ))
            .returning(chat_messages::id),
            &mut conn,
        )
        .await?;

        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory directory for tests and database-less runs. Matches and blocks
/// are registered explicitly; read state lives in the paired message store.
pub struct MemoryThreads {
    matches: DashMap<String, ChatMatch>,
    blocks: Mutex<HashSet<(String, String)>>,
    messages: Arc<MemoryMessageStore>,
}

impl MemoryThreads {
    pub fn new(messages: Arc<MemoryMessageStore>) -> Self {
        Self {
            matches: DashMap::new(),
            blocks: Mutex::new(HashSet::new()),
            messages,
        }
    }

    pub fn add_match(&self, match_id: &str, user1_id: &str, user2_id: &str) {
        self.matches.insert(
            match_id.to_string(),
            ChatMatch {
                id: match_id.to_string(),
                user1_id: user1_id.to_string(),
                user2_id: user2_id.to_string(),
                status: ACTIVE.to_string(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn set_status(&self, match_id: &str, status: &str) {
        if let Some(mut m) = self.matches.get_mut(match_id) {
            m.status = status.to_string();
        }
    }

    pub fn add_block(&self, blocker_id: &str, blocked_id: &str) {
        self.blocks
            .lock()
            .insert((blocker_id.to_string(), blocked_id.to_string()));
    }
}

#[async_trait]
impl ThreadDirectory for MemoryThreads {
    async fn resolve_other_party(
        &self,
        match_id: &str,
        sender_id: &str,
    ) -> Result<Option<String>, ApiError> {
        Ok(self
            .matches
            .get(match_id)
            .filter(|m| m.status == ACTIVE)
            .and_then(|m| m.other_party(sender_id).map(str::to_string)))
    }

    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool, ApiError> {
        let blocks = self.blocks.lock();
        Ok(blocks.contains(&(a.to_string(), b.to_string()))
            || blocks.contains(&(b.to_string(), a.to_string())))
    }

    async fn mark_read(&self, match_id: &str, reader_id: &str) -> Result<Vec<String>, ApiError> {
        Ok(self.messages.mark_read(match_id, reader_id))
    }
}
