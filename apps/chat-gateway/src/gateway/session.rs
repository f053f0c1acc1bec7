//! Per-connection session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chat_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::auth::AuthenticatedIdentity;

use super::envelope::{ChatEnvelope, ChatMode, Role};

/// Why an envelope could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Outbound queue is at capacity. The session must be evicted.
    Full,
    /// The session is already closing.
    Closed,
}

/// State for a single WebSocket connection.
///
/// The socket's write loop owns the receiving half of the outbound queue.
/// Everything else (the hub, room pumps, the read loop) only ever calls
/// [`ClientSession::enqueue`], which never blocks.
pub struct ClientSession {
    /// Unique session identifier (`ses_` prefixed ULID).
    pub session_id: String,
    pub identity: AuthenticatedIdentity,
    pub mode: ChatMode,
    /// Match id in private mode, room id in live mode.
    pub target_id: String,
    pub role: Role,
    outbound: mpsc::Sender<Arc<ChatEnvelope>>,
    capacity: usize,
    closed: watch::Sender<bool>,
    unregistered: AtomicBool,
    /// `Some` while a catch-up replay is being assembled. Live deliveries are
    /// parked here so they can't overtake the replay.
    replay: Mutex<Option<Vec<Arc<ChatEnvelope>>>>,
}

impl ClientSession {
    pub fn new(
        identity: AuthenticatedIdentity,
        mode: ChatMode,
        target_id: impl Into<String>,
        role: Role,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<ChatEnvelope>>) {
        let capacity = capacity.max(1);
        let (outbound, rx) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            session_id: prefixed_ulid(prefix::SESSION),
            identity,
            mode,
            target_id: target_id.into(),
            role,
            outbound,
            capacity,
            closed,
            unregistered: AtomicBool::new(false),
            replay: Mutex::new(None),
        });
        (session, rx)
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    /// Queue an envelope for the write loop without waiting.
    pub fn enqueue(&self, envelope: Arc<ChatEnvelope>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Queue an envelope behind any pending replay. While a replay is being
    /// assembled the envelope is held back and flushed by
    /// [`ClientSession::finish_replay`].
    pub fn deliver(&self, envelope: Arc<ChatEnvelope>) -> Result<(), QueueError> {
        let mut replay = self.replay.lock();
        match replay.as_mut() {
            Some(pending) if pending.len() >= self.capacity => Err(QueueError::Full),
            Some(pending) => {
                pending.push(envelope);
                Ok(())
            }
            None => self.enqueue(envelope),
        }
    }

    /// Start holding back live deliveries until the replay is queued.
    pub fn begin_replay(&self) {
        *self.replay.lock() = Some(Vec::new());
    }

    pub fn replay_pending(&self) -> bool {
        self.replay.lock().is_some()
    }

    /// Queue `entries` (ascending by sequence), then release anything held
    /// back in the meantime, skipping sequences the replay already covered.
    ///
    /// Returns how many replayed entries were queued.
    pub fn finish_replay(&self, entries: Vec<Arc<ChatEnvelope>>) -> Result<usize, QueueError> {
        let mut replay = self.replay.lock();
        let held = replay.take().unwrap_or_default();

        let mut high_water = 0;
        let count = entries.len();
        for entry in entries {
            high_water = high_water.max(entry.sequence().unwrap_or(0));
            self.enqueue(entry)?;
        }

        for entry in held {
            if entry.sequence().is_some_and(|seq| seq <= high_water) {
                continue;
            }
            self.enqueue(entry)?;
        }

        Ok(count)
    }

    /// Signal both loops to stop. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`ClientSession::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Returns true for the first caller only, so unregistration runs once
    /// whether it is triggered by the read loop or by eviction.
    pub fn begin_unregister(&self) -> bool {
        !self.unregistered.swap(true, Ordering::AcqRel)
    }
}
