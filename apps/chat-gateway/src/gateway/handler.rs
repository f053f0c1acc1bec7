//! Inbound frame handlers.
//!
//! These run inline in each session's read loop, called through
//! [`Hub::route_inbound`]. Identity, ids, sequence numbers and timestamps are
//! always stamped here from server state.

use std::sync::Arc;

use serde_json::Value;

use super::envelope::{
    ChatEnvelope, ChatEvent, ChatMode, Compose, DeliveryStatus, PinBody, PinRequest,
    ReadReceiptBody, TypingBody, TypingRequest,
};
use super::registry::Hub;
use super::session::ClientSession;

/// Which live frame produced a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveKind {
    Message,
    Gift,
    System,
}

impl Hub {
    // -- private ----------------------------------------------------------

    /// The other participant of the session's match, if the sender may
    /// message them. Lookup failures are logged and treated as "no".
    async fn other_party(&self, session: &ClientSession) -> Option<String> {
        let sender = session.user_id();
        let match_id = &session.target_id;

        let other = match self.threads.resolve_other_party(match_id, sender).await {
            Ok(Some(other)) => other,
            Ok(None) => {
                tracing::debug!(%match_id, user_id = %sender, "sender is not in an active match");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, %match_id, "failed to resolve match participant");
                return None;
            }
        };

        match self.threads.is_blocked(sender, &other).await {
            Ok(false) => Some(other),
            Ok(true) => {
                tracing::debug!(%match_id, user_id = %sender, "dropping frame between blocked users");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, %match_id, "failed to check block list");
                None
            }
        }
    }

    pub(super) async fn private_message(&self, session: &Arc<ClientSession>, compose: Compose) {
        if compose.is_empty() {
            return;
        }
        let Some(receiver) = self.other_party(session).await else {
            return;
        };

        let mut body = compose.into_body("text");
        body.receiver_id = Some(receiver.clone());
        body.delivery_status = Some(DeliveryStatus::Sent);

        let envelope = Arc::new(
            ChatEnvelope::new(ChatMode::Private, &session.target_id, ChatEvent::Message(body))
                .with_message_id(self.snowflake.next_id().to_string())
                .from_identity(&session.identity),
        );

        self.sink.save(envelope.clone());
        self.deliver_private(&receiver, envelope.clone());
        self.deliver_to(session, envelope);
    }

    pub(super) async fn private_typing(&self, session: &Arc<ClientSession>, typing: TypingRequest) {
        let Some(receiver) = self.other_party(session).await else {
            return;
        };

        let envelope = ChatEnvelope::new(
            ChatMode::Private,
            &session.target_id,
            ChatEvent::Typing(TypingBody {
                is_typing: typing.is_typing,
                receiver_id: Some(receiver.clone()),
            }),
        )
        .from_identity(&session.identity);

        self.deliver_private(&receiver, Arc::new(envelope));
    }

    pub(super) async fn private_read_receipt(&self, session: &Arc<ClientSession>) {
        let Some(other) = self.other_party(session).await else {
            return;
        };

        let message_ids = match self
            .threads
            .mark_read(&session.target_id, session.user_id())
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, match_id = %session.target_id, "failed to mark messages read");
                Vec::new()
            }
        };

        let envelope = ChatEnvelope::new(
            ChatMode::Private,
            &session.target_id,
            ChatEvent::ReadReceipt(ReadReceiptBody {
                message_ids,
                delivery_status: DeliveryStatus::Read,
                receiver_id: Some(other.clone()),
            }),
        )
        .from_identity(&session.identity);

        self.deliver_private(&other, Arc::new(envelope));
    }

    // -- live -------------------------------------------------------------

    pub(super) async fn live_message(&self, session: &Arc<ClientSession>, compose: Compose) {
        self.live_sequenced(session, compose, LiveKind::Message).await
    }

    pub(super) async fn live_gift(&self, session: &Arc<ClientSession>, compose: Compose) {
        self.live_sequenced(session, compose, LiveKind::Gift).await
    }

    pub(super) async fn live_system(&self, session: &Arc<ClientSession>, compose: Compose) {
        if !session.is_owner() {
            tracing::debug!(
                session_id = %session.session_id,
                room_id = %session.target_id,
                "ignoring system message from non-owner"
            );
            return;
        }
        self.live_sequenced(session, compose, LiveKind::System).await
    }

    async fn live_sequenced(&self, session: &Arc<ClientSession>, compose: Compose, kind: LiveKind) {
        if compose.is_empty() {
            return;
        }
        let room_id = &session.target_id;
        let Some(lock) = self.rooms.get(room_id).map(|r| r.publish_lock.clone()) else {
            return;
        };
        // Sequence order must match publish order within this process.
        let _guard = lock.lock().await;

        let sequence = match self.sequencer.next(room_id).await {
            Ok(seq) => seq,
            Err(e) => {
                tracing::error!(error = %e, %room_id, "failed to assign sequence");
                return;
            }
        };
        let viewer_count = self.presence.viewer_count(room_id).await.unwrap_or(0);

        let mut body = match kind {
            LiveKind::Message => compose.into_body("text"),
            LiveKind::Gift => compose.into_body("gift"),
            LiveKind::System => compose.into_body("system"),
        };
        body.sequence = Some(sequence);
        body.viewer_count = Some(viewer_count);
        let event = match kind {
            LiveKind::Message => ChatEvent::Message(body),
            LiveKind::Gift => {
                body.content_type = "gift".to_string();
                ChatEvent::Gift(body)
            }
            LiveKind::System => {
                body.content_type = "system".to_string();
                body.system = true;
                ChatEvent::System(body)
            }
        };

        let envelope = Arc::new(
            ChatEnvelope::new(ChatMode::Live, room_id, event)
                .with_message_id(self.snowflake.next_id().to_string())
                .from_identity(&session.identity),
        );

        if let Err(e) = self.log.append(room_id, &envelope).await {
            tracing::error!(error = %e, %room_id, sequence, "failed to append to replay log");
        }
        self.sink.save(envelope.clone());
        self.publish_live(room_id, &envelope).await;
    }

    pub(super) async fn live_pin(&self, session: &Arc<ClientSession>, pin: PinRequest) {
        let room_id = &session.target_id;
        if !session.is_owner() {
            tracing::debug!(
                session_id = %session.session_id,
                %room_id,
                "ignoring pin from non-owner"
            );
            return;
        }

        if !pin.pinned {
            if let Err(e) = self.presence.clear_pinned(room_id).await {
                tracing::error!(error = %e, %room_id, "failed to clear pinned message");
                return;
            }
            let envelope = ChatEnvelope::new(
                ChatMode::Live,
                room_id,
                ChatEvent::Pin(PinBody {
                    content: String::new(),
                    pinned: false,
                }),
            )
            .from_identity(&session.identity);
            self.publish_live(room_id, &envelope).await;
            return;
        }

        let content = match pin.content {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let mut envelope = ChatEnvelope::new(
            ChatMode::Live,
            room_id,
            ChatEvent::Pin(PinBody {
                content,
                pinned: true,
            }),
        )
        .from_identity(&session.identity);
        envelope.message_id = pin.message_id.filter(|id| !id.is_empty());

        if let Err(e) = self.presence.set_pinned(room_id, &envelope).await {
            tracing::error!(error = %e, %room_id, "failed to store pinned message");
            return;
        }
        if let Some(message_id) = &envelope.message_id {
            self.sink.mark_pinned(message_id.clone());
        }
        self.publish_live(room_id, &envelope).await;
    }
}
