//! Live catch-up on reconnect.
//!
//! A viewer reconnecting with `last_seq` gets every retained room message
//! with a higher sequence, oldest first, before normal live delivery resumes.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::envelope::ChatEnvelope;
use super::registry::Hub;
use super::session::{ClientSession, QueueError};

/// Upper bound on rows pulled from the durable store per catch-up.
pub const DURABLE_REPLAY_LIMIT: i64 = 100;

impl Hub {
    /// Replay everything after `last_seq` to a session that called
    /// [`ClientSession::begin_replay`] before registering. Returns how many
    /// envelopes were replayed.
    ///
    /// Entries from the durable store and the replay log are merged by
    /// sequence; the log's copy wins. Gaps (evicted entries) are skipped.
    pub async fn catch_up(&self, session: &Arc<ClientSession>, last_seq: u64) -> usize {
        let room_id = &session.target_id;
        let mut merged: BTreeMap<u64, Arc<ChatEnvelope>> = BTreeMap::new();

        match self
            .messages
            .live_history_after(room_id, last_seq, DURABLE_REPLAY_LIMIT)
            .await
        {
            Ok(rows) => {
                for envelope in rows {
                    if let Some(seq) = envelope.sequence() {
                        merged.insert(seq, Arc::new(envelope));
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %room_id, "failed to load durable history for catch-up");
            }
        }

        match self.log.read_after(room_id, last_seq).await {
            Ok(entries) => {
                for entry in entries {
                    merged.insert(entry.sequence, entry.envelope);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %room_id, "failed to read replay log for catch-up");
            }
        }

        let entries: Vec<Arc<ChatEnvelope>> = merged.into_values().collect();
        match session.finish_replay(entries) {
            Ok(count) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    %room_id,
                    last_seq,
                    replayed = count,
                    "live catch-up complete"
                );
                count
            }
            Err(QueueError::Full) => {
                self.evict(session, "outbound queue full during catch-up");
                0
            }
            Err(QueueError::Closed) => 0,
        }
    }
}
