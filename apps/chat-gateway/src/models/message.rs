use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use crate::db::schema::chat_messages;
use crate::error::ApiError;
use crate::gateway::envelope::{ChatEnvelope, ChatEvent, ChatMode, MessageBody};

/// One persisted chat message, private or live.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessage {
    pub id: i64,
    pub match_id: Option<String>,
    pub receiver_id: Option<String>,
    pub live_stream_id: Option<String>,
    pub is_live: bool,
    pub seq: Option<i64>,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub gift_id: Option<String>,
    pub metadata: Option<Value>,
    pub is_system: bool,
    pub pinned: bool,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a row from a stamped `message`, `gift` or `system` envelope.
    pub fn from_envelope(envelope: &ChatEnvelope) -> Result<Self, ApiError> {
        let body = envelope
            .message_body()
            .ok_or_else(|| ApiError::bad_request("only message envelopes are stored"))?;
        let id = envelope
            .message_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| ApiError::bad_request("message id must be a snowflake"))?;
        let sender_id = envelope
            .sender_id
            .clone()
            .ok_or_else(|| ApiError::bad_request("message has no sender"))?;

        let is_live = envelope.mode == ChatMode::Live;
        Ok(Self {
            id,
            match_id: (!is_live).then(|| envelope.target_id.clone()),
            receiver_id: body.receiver_id.clone(),
            live_stream_id: is_live.then(|| envelope.target_id.clone()),
            is_live,
            seq: body.sequence.map(|s| s as i64),
            sender_id,
            sender_name: envelope.sender_name.clone(),
            message_type: body.content_type.clone(),
            content: body.content.clone(),
            media_url: body.media_ref.clone(),
            gift_id: body.gift_ref.clone(),
            metadata: body.metadata.clone(),
            is_system: body.system,
            pinned: body.pinned,
            is_read: false,
            read_at: None,
            created_at: envelope.timestamp,
        })
    }

    /// Rebuild the envelope a live row was stored from.
    pub fn into_envelope(self) -> ChatEnvelope {
        let (mode, target_id) = if self.is_live {
            (ChatMode::Live, self.live_stream_id.unwrap_or_default())
        } else {
            (ChatMode::Private, self.match_id.unwrap_or_default())
        };

        let body = MessageBody {
            receiver_id: self.receiver_id,
            sequence: self.seq.map(|s| s.max(0) as u64),
            content: self.content,
            content_type: self.message_type,
            media_ref: self.media_url,
            gift_ref: self.gift_id,
            pinned: self.pinned,
            system: self.is_system,
            metadata: self.metadata,
            ..MessageBody::default()
        };
        let event = if body.system {
            ChatEvent::System(body)
        } else if body.content_type == "gift" {
            ChatEvent::Gift(body)
        } else {
            ChatEvent::Message(body)
        };

        ChatEnvelope {
            mode,
            target_id,
            message_id: Some(self.id.to_string()),
            sender_id: Some(self.sender_id),
            sender_name: self.sender_name,
            timestamp: self.created_at,
            event,
        }
    }
}
