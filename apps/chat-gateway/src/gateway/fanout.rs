//! Room-keyed publish/subscribe for live chat.
//!
//! Each gateway process keeps at most one local `tokio::sync::broadcast`
//! channel per room. With Redis, a listener task per room forwards the
//! room's pub/sub channel into it, so a publish on any process reaches
//! subscribers on every process. Channels are reference counted through
//! [`RoomSubscription`] and torn down when the last subscription drops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::error::ApiError;

use super::envelope::ChatEnvelope;

/// Capacity of each room's local broadcast channel. A room pump that falls
/// further behind than this skips messages (RecvError::Lagged).
const ROOM_CHANNEL_CAPACITY: usize = 4096;

/// Delay before re-subscribing after the Redis pub/sub connection drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub fn channel_key(room_id: &str) -> String {
    format!("live:{room_id}:chat")
}

#[async_trait]
pub trait FanoutBroker: Send + Sync {
    /// Publish to every subscriber of the room, on every gateway process.
    async fn publish(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError>;
    /// Open (or share) this process's subscription to a room.
    fn subscribe(&self, room_id: &str) -> RoomSubscription;
}

/// A handle on a room's local channel. Dropping the last handle for a room
/// closes the channel and stops its listener.
pub struct RoomSubscription {
    receiver: broadcast::Receiver<Arc<ChatEnvelope>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RoomSubscription {
    pub async fn recv(&mut self) -> Result<Arc<ChatEnvelope>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

struct RoomChannel {
    sender: broadcast::Sender<Arc<ChatEnvelope>>,
    listener: Option<AbortHandle>,
}

impl Drop for RoomChannel {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// The per-process table of open room channels.
#[derive(Clone, Default)]
struct LocalRooms {
    channels: Arc<DashMap<String, RoomChannel>>,
}

impl LocalRooms {
    /// Subscribe to `room_id`, creating the channel with `open` if this is the
    /// first subscriber. `open` may start a listener feeding the sender.
    fn subscribe_with(
        &self,
        room_id: &str,
        open: impl FnOnce(broadcast::Sender<Arc<ChatEnvelope>>) -> Option<AbortHandle>,
    ) -> RoomSubscription {
        let receiver = {
            let entry = self.channels.entry(room_id.to_string()).or_insert_with(|| {
                let (sender, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
                let listener = open(sender.clone());
                RoomChannel { sender, listener }
            });
            entry.sender.subscribe()
        };

        let channels = self.channels.clone();
        let room_id = room_id.to_string();
        RoomSubscription {
            receiver,
            release: Some(Box::new(move || {
                // The releasing receiver is still alive here, so <= 1 means
                // nobody else is listening.
                channels.remove_if(&room_id, |_, ch| ch.sender.receiver_count() <= 1);
            })),
        }
    }

    /// Deliver to local subscribers. Returns how many receivers saw it.
    fn send(&self, room_id: &str, envelope: Arc<ChatEnvelope>) -> usize {
        match self.channels.get(room_id) {
            Some(ch) => ch.sender.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    fn len(&self) -> usize {
        self.channels.len()
    }
}

// ---------------------------------------------------------------------------
// In-process broker
// ---------------------------------------------------------------------------

/// Single-process broker: publishing goes straight to the local channel.
#[derive(Default)]
pub struct MemoryBroker {
    rooms: LocalRooms,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with at least one open subscription.
    pub fn open_rooms(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl FanoutBroker for MemoryBroker {
    async fn publish(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        self.rooms.send(room_id, Arc::new(envelope.clone()));
        Ok(())
    }

    fn subscribe(&self, room_id: &str) -> RoomSubscription {
        self.rooms.subscribe_with(room_id, |_| None)
    }
}

// ---------------------------------------------------------------------------
// Redis pub/sub broker
// ---------------------------------------------------------------------------

/// Cross-process broker on Redis pub/sub. Publishes always go through Redis,
/// including for subscribers on the publishing process.
pub struct RedisBroker {
    conn: ConnectionManager,
    client: redis::Client,
    rooms: LocalRooms,
}

impl RedisBroker {
    pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
        Self {
            conn,
            client,
            rooms: LocalRooms::default(),
        }
    }
}

#[async_trait]
impl FanoutBroker for RedisBroker {
    async fn publish(&self, room_id: &str, envelope: &ChatEnvelope) -> Result<(), ApiError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel_key(room_id), payload).await?;
        Ok(())
    }

    fn subscribe(&self, room_id: &str) -> RoomSubscription {
        let client = self.client.clone();
        let channel = channel_key(room_id);
        self.rooms.subscribe_with(room_id, move |sender| {
            let task = tokio::spawn(listen(client, channel, sender));
            Some(task.abort_handle())
        })
    }
}

/// Forward one Redis channel into a local broadcast sender until aborted,
/// reconnecting whenever the pub/sub connection ends.
async fn listen(
    client: redis::Client,
    channel: String,
    sender: broadcast::Sender<Arc<ChatEnvelope>>,
) {
    loop {
        match forward(&client, &channel, &sender).await {
            Ok(()) => tracing::warn!(%channel, "redis subscription ended, resubscribing"),
            Err(e) => tracing::error!(?e, %channel, "redis subscription failed, resubscribing"),
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

async fn forward(
    client: &redis::Client,
    channel: &str,
    sender: &broadcast::Sender<Arc<ChatEnvelope>>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    tracing::debug!(%channel, "subscribed to room channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(?e, %channel, "unreadable pub/sub payload");
                continue;
            }
        };
        match serde_json::from_str::<ChatEnvelope>(&payload) {
            Ok(envelope) => {
                // No local receivers is not an error; the room may be closing.
                let _ = sender.send(Arc::new(envelope));
            }
            Err(e) => tracing::warn!(?e, %channel, "dropping malformed room envelope"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::envelope::{ChatEvent, ChatMode, RoomPresenceBody};

    fn join(count: i64) -> ChatEnvelope {
        ChatEnvelope::new(
            ChatMode::Live,
            "r1",
            ChatEvent::Join(RoomPresenceBody {
                viewer_count: count,
            }),
        )
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_room() {
        let broker = MemoryBroker::new();
        let mut a = broker.subscribe("r1");
        let mut b = broker.subscribe("r1");
        let mut other = broker.subscribe("r2");

        broker.publish("r1", &join(2)).await.unwrap();

        assert_eq!(a.recv().await.unwrap().kind(), "join");
        assert_eq!(b.recv().await.unwrap().kind(), "join");
        assert!(matches!(
            other.receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let broker = MemoryBroker::new();
        broker.publish("nobody", &join(0)).await.unwrap();
        assert_eq!(broker.open_rooms(), 0);
    }

    #[tokio::test]
    async fn last_drop_releases_the_room() {
        let broker = MemoryBroker::new();
        let a = broker.subscribe("r1");
        let b = broker.subscribe("r1");
        assert_eq!(broker.open_rooms(), 1);

        drop(a);
        assert_eq!(broker.open_rooms(), 1);
        drop(b);
        assert_eq!(broker.open_rooms(), 0);

        // Re-subscribing opens a fresh channel.
        let _c = broker.subscribe("r1");
        assert_eq!(broker.open_rooms(), 1);
    }
}
