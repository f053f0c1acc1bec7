//! The connection registry ("hub").
//!
//! The hub is the only component that mutates session membership. Private
//! sessions are keyed by user; live sessions are keyed by `(room, user)`
//! and each room with local members owns one broker subscription whose pump
//! task fans envelopes out to the members' outbound queues.
//!
//! Uses `DashMap` for shard-level concurrency. Critical sections are plain
//! map operations; store and broker I/O always happens outside them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chat_common::SnowflakeGenerator;
use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::db::messages::MessageStore;
use crate::db::threads::ThreadDirectory;

use super::append_log::AppendLog;
use super::envelope::{ChatEnvelope, ChatEvent, ChatMode, ClientFrame, RoomPresenceBody};
use super::fanout::{FanoutBroker, RoomSubscription};
use super::presence::Presence;
use super::sequence::RoomSequencer;
use super::session::{ClientSession, QueueError};
use super::sink::PersistenceSink;

/// Collaborators the hub routes through.
pub struct HubParts {
    pub broker: Arc<dyn FanoutBroker>,
    pub presence: Presence,
    pub sequencer: RoomSequencer,
    pub log: Arc<dyn AppendLog>,
    pub sink: PersistenceSink,
    pub threads: Arc<dyn ThreadDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub snowflake: Arc<SnowflakeGenerator>,
}

/// Local state for one live room on this process.
pub(crate) struct LiveRoom {
    members: HashMap<String, Arc<ClientSession>>,
    /// Serializes sequence-assign-then-publish for this room on this process.
    pub(crate) publish_lock: Arc<tokio::sync::Mutex<()>>,
    pump: JoinHandle<()>,
}

impl Drop for LiveRoom {
    fn drop(&mut self) {
        // Dropping the pump's subscription releases the broker channel.
        self.pump.abort();
    }
}

pub struct Hub {
    private: DashMap<String, Arc<ClientSession>>,
    pub(crate) rooms: DashMap<String, LiveRoom>,
    pub(crate) broker: Arc<dyn FanoutBroker>,
    pub(crate) presence: Presence,
    pub(crate) sequencer: RoomSequencer,
    pub(crate) log: Arc<dyn AppendLog>,
    pub(crate) sink: PersistenceSink,
    pub(crate) threads: Arc<dyn ThreadDirectory>,
    pub(crate) messages: Arc<dyn MessageStore>,
    pub(crate) snowflake: Arc<SnowflakeGenerator>,
}

impl Hub {
    pub fn new(parts: HubParts) -> Arc<Self> {
        Arc::new(Self {
            private: DashMap::new(),
            rooms: DashMap::new(),
            broker: parts.broker,
            presence: parts.presence,
            sequencer: parts.sequencer,
            log: parts.log,
            sink: parts.sink,
            threads: parts.threads,
            messages: parts.messages,
            snowflake: parts.snowflake,
        })
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Number of private sessions on this process.
    pub fn private_sessions(&self) -> usize {
        self.private.len()
    }

    /// Number of live rooms with members on this process.
    pub fn open_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_members(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.members.len())
    }

    /// Add a session. Any earlier session with the same key is closed.
    pub async fn register(self: &Arc<Self>, session: &Arc<ClientSession>) {
        let user_id = session.user_id().to_string();

        match session.mode {
            ChatMode::Private => {
                let previous = self.private.insert(user_id.clone(), session.clone());
                if let Some(previous) = previous {
                    self.close_displaced(&previous);
                }
                if let Err(e) = self.presence.mark_online(&user_id).await {
                    tracing::error!(error = %e, %user_id, "failed to mark user online");
                }
            }
            ChatMode::Live => {
                let room_id = session.target_id.clone();
                let previous = {
                    let mut room = self
                        .rooms
                        .entry(room_id.clone())
                        .or_insert_with(|| self.open_room(&room_id));
                    room.members.insert(user_id.clone(), session.clone())
                };
                if let Some(previous) = previous {
                    self.close_displaced(&previous);
                }

                let viewer_count = match self.presence.join_room(&room_id).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::error!(error = %e, %room_id, "failed to count viewer join");
                        self.presence.viewer_count(&room_id).await.unwrap_or(0)
                    }
                };

                let join = ChatEnvelope::new(
                    ChatMode::Live,
                    &room_id,
                    ChatEvent::Join(RoomPresenceBody { viewer_count }),
                )
                .from_identity(&session.identity);
                self.publish_live(&room_id, &join).await;

                tracing::info!(%room_id, %user_id, viewer_count, "viewer joined live room");
            }
        }
    }

    /// Remove a session and undo what `register` did. Runs once per session;
    /// later calls are no-ops.
    pub async fn unregister(&self, session: &Arc<ClientSession>) {
        if !session.begin_unregister() {
            return;
        }
        session.close();

        let user_id = session.user_id();
        match session.mode {
            ChatMode::Private => {
                let removed = self
                    .private
                    .remove_if(user_id, |_, s| s.session_id == session.session_id)
                    .is_some();
                if removed || !self.private.contains_key(user_id) {
                    if let Err(e) = self.presence.mark_offline(user_id).await {
                        tracing::error!(error = %e, %user_id, "failed to mark user offline");
                    }
                    // A reconnect may have registered while the offline write
                    // was in flight and been overwritten by it.
                    if self.private.contains_key(user_id) {
                        if let Err(e) = self.presence.mark_online(user_id).await {
                            tracing::error!(error = %e, %user_id, "failed to mark user online");
                        }
                    }
                }
            }
            ChatMode::Live => {
                let room_id = &session.target_id;
                let now_empty = match self.rooms.get_mut(room_id) {
                    Some(mut room) => {
                        if room
                            .members
                            .get(user_id)
                            .is_some_and(|s| s.session_id == session.session_id)
                        {
                            room.members.remove(user_id);
                        }
                        room.members.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.rooms.remove_if(room_id, |_, room| room.members.is_empty());
                }

                // Every registered live session counted one join, so it
                // counts exactly one leave even if it was displaced.
                let viewer_count = match self.presence.leave_room(room_id).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::error!(error = %e, %room_id, "failed to count viewer leave");
                        self.presence.viewer_count(room_id).await.unwrap_or(0)
                    }
                };

                let leave = ChatEnvelope::new(
                    ChatMode::Live,
                    room_id,
                    ChatEvent::Leave(RoomPresenceBody { viewer_count }),
                )
                .from_identity(&session.identity);
                self.publish_live(room_id, &leave).await;

                tracing::info!(%room_id, %user_id, viewer_count, "viewer left live room");
            }
        }
    }

    /// Dispatch a parsed client frame by `(mode, type)`. Combinations that
    /// don't apply to the session's mode are dropped.
    pub async fn route_inbound(&self, session: &Arc<ClientSession>, frame: ClientFrame) {
        match (session.mode, frame) {
            (ChatMode::Private, ClientFrame::Message(compose)) => {
                self.private_message(session, compose).await
            }
            (ChatMode::Private, ClientFrame::Typing(typing)) => {
                self.private_typing(session, typing).await
            }
            (ChatMode::Private, ClientFrame::ReadReceipt(_)) => {
                self.private_read_receipt(session).await
            }
            (ChatMode::Live, ClientFrame::Message(compose)) => {
                self.live_message(session, compose).await
            }
            (ChatMode::Live, ClientFrame::Gift(compose)) => self.live_gift(session, compose).await,
            (ChatMode::Live, ClientFrame::System(compose)) => {
                self.live_system(session, compose).await
            }
            (ChatMode::Live, ClientFrame::Pin(pin)) => self.live_pin(session, pin).await,
            (mode, frame) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    mode = mode.as_str(),
                    ?frame,
                    "dropping frame not handled in this mode"
                );
            }
        }
    }

    /// Queue an envelope for a user's private session on the same match.
    /// A full queue evicts that session. Returns true if queued.
    pub fn deliver_private(&self, user_id: &str, envelope: Arc<ChatEnvelope>) -> bool {
        let Some(target) = self.private.get(user_id).map(|s| s.value().clone()) else {
            return false;
        };
        if target.target_id != envelope.target_id {
            return false;
        }
        self.deliver_to(&target, envelope)
    }

    /// Queue on a session behind any pending replay, evicting it if its
    /// queue is full.
    pub(crate) fn deliver_to(&self, session: &Arc<ClientSession>, envelope: Arc<ChatEnvelope>) -> bool {
        match session.deliver(envelope) {
            Ok(()) => true,
            Err(QueueError::Full) => {
                self.evict(session, "outbound queue full");
                false
            }
            Err(QueueError::Closed) => false,
        }
    }

    /// Hand an envelope to the broker. Local members receive it through the
    /// room pump like everyone else.
    pub async fn publish_live(&self, room_id: &str, envelope: &ChatEnvelope) {
        if let Err(e) = self.broker.publish(room_id, envelope).await {
            tracing::error!(error = %e, %room_id, kind = envelope.kind(), "broker publish failed");
        }
    }

    /// Close a session and drop it from the maps. Its read loop finishes the
    /// unregistration (presence, viewer count, room cleanup).
    pub(crate) fn evict(&self, session: &Arc<ClientSession>, reason: &'static str) {
        tracing::warn!(
            session_id = %session.session_id,
            user_id = %session.user_id(),
            target_id = %session.target_id,
            reason,
            "evicting session"
        );
        session.close();

        let user_id = session.user_id();
        match session.mode {
            ChatMode::Private => {
                self.private
                    .remove_if(user_id, |_, s| s.session_id == session.session_id);
            }
            ChatMode::Live => {
                if let Some(mut room) = self.rooms.get_mut(&session.target_id) {
                    if room
                        .members
                        .get(user_id)
                        .is_some_and(|s| s.session_id == session.session_id)
                    {
                        room.members.remove(user_id);
                    }
                }
            }
        }
    }

    fn close_displaced(&self, previous: &Arc<ClientSession>) {
        tracing::info!(
            session_id = %previous.session_id,
            user_id = %previous.user_id(),
            "session replaced by a newer connection"
        );
        previous.close();
    }

    fn open_room(self: &Arc<Self>, room_id: &str) -> LiveRoom {
        let subscription = self.broker.subscribe(room_id);
        let pump = tokio::spawn(pump_room(
            Arc::downgrade(self),
            room_id.to_string(),
            subscription,
        ));
        tracing::debug!(%room_id, "opened live room");
        LiveRoom {
            members: HashMap::new(),
            publish_lock: Arc::new(tokio::sync::Mutex::new(())),
            pump,
        }
    }

    /// Deliver one room envelope to every local member.
    fn fan_out(&self, room_id: &str, envelope: &Arc<ChatEnvelope>) {
        let members: Vec<Arc<ClientSession>> = match self.rooms.get(room_id) {
            Some(room) => room.members.values().cloned().collect(),
            None => return,
        };

        for member in members {
            self.deliver_to(&member, envelope.clone());
        }
    }
}

async fn pump_room(hub: Weak<Hub>, room_id: String, mut subscription: RoomSubscription) {
    loop {
        match subscription.recv().await {
            Ok(envelope) => {
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.fan_out(&room_id, &envelope);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(%room_id, skipped, "live room pump lagged behind broker");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
