//! Chat envelope wire types.
//!
//! Every frame the gateway emits is a [`ChatEnvelope`]: a common header
//! (mode, target, ids, sender, timestamp) flattened together with a
//! [`ChatEvent`] tagged by `type`. Client frames are parsed into the narrower
//! [`ClientFrame`]; anything a client sends about identity or sequencing is
//! ignored and re-stamped by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthenticatedIdentity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Private,
    Live,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Private => "private",
            ChatMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Participant,
    /// The room's broadcaster. Only owners may pin or send system messages.
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Read,
}

/// An outbound chat frame. Immutable once built; shared as `Arc<ChatEnvelope>`
/// between every session it is delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default)]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ChatEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(MessageBody),
    Gift(MessageBody),
    System(MessageBody),
    Typing(TypingBody),
    ReadReceipt(ReadReceiptBody),
    Join(RoomPresenceBody),
    Leave(RoomPresenceBody),
    Pin(PinBody),
    Error(ErrorBody),
}

/// Body shared by `message`, `gift` and `system` frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBody {
    /// Private mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    /// Live mode only. Assigned once by the room sequencer.
    #[serde(rename = "seq", alias = "sequence", skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub content: String,
    #[serde(rename = "message_type", alias = "content_type")]
    pub content_type: String,
    #[serde(rename = "media_url", alias = "media_ref", skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(rename = "gift_id", alias = "gift_ref", skip_serializing_if = "Option::is_none")]
    pub gift_ref: Option<String>,
    #[serde(rename = "is_pinned", skip_serializing_if = "is_false")]
    pub pinned: bool,
    #[serde(rename = "is_system", skip_serializing_if = "is_false")]
    pub system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingBody {
    pub is_typing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptBody {
    /// Ids flipped to read by this receipt.
    #[serde(default)]
    pub message_ids: Vec<String>,
    pub delivery_status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomPresenceBody {
    pub viewer_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinBody {
    pub content: String,
    #[serde(rename = "is_pinned")]
    pub pinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub code: String,
    pub content: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ChatEnvelope {
    pub fn new(mode: ChatMode, target_id: impl Into<String>, event: ChatEvent) -> Self {
        Self {
            mode,
            target_id: target_id.into(),
            message_id: None,
            sender_id: None,
            sender_name: None,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Stamp sender fields from the authenticated identity.
    pub fn from_identity(mut self, identity: &AuthenticatedIdentity) -> Self {
        self.sender_id = Some(identity.user_id.clone());
        self.sender_name = identity.display_name.clone();
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn error(
        mode: ChatMode,
        target_id: impl Into<String>,
        code: &str,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            mode,
            target_id,
            ChatEvent::Error(ErrorBody {
                code: code.to_string(),
                content: content.into(),
            }),
        )
    }

    /// Live sequence number, for message-like events.
    pub fn sequence(&self) -> Option<u64> {
        self.message_body().and_then(|b| b.sequence)
    }

    pub fn message_body(&self) -> Option<&MessageBody> {
        match &self.event {
            ChatEvent::Message(b) | ChatEvent::Gift(b) | ChatEvent::System(b) => Some(b),
            _ => None,
        }
    }

    /// The wire `type` of this envelope.
    pub fn kind(&self) -> &'static str {
        match self.event {
            ChatEvent::Message(_) => "message",
            ChatEvent::Gift(_) => "gift",
            ChatEvent::System(_) => "system",
            ChatEvent::Typing(_) => "typing",
            ChatEvent::ReadReceipt(_) => "read_receipt",
            ChatEvent::Join(_) => "join",
            ChatEvent::Leave(_) => "leave",
            ChatEvent::Pin(_) => "pin",
            ChatEvent::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A frame sent by a client. Unknown `type` values and malformed JSON fail to
/// parse and are dropped by the read loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message(Compose),
    Gift(Compose),
    System(Compose),
    Typing(TypingRequest),
    ReadReceipt(ReadRequest),
    Pin(PinRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Compose {
    pub content: Option<Value>,
    #[serde(alias = "content_type")]
    pub message_type: Option<String>,
    #[serde(alias = "media_ref")]
    pub media_url: Option<String>,
    #[serde(alias = "gift_ref")]
    pub gift_id: Option<String>,
    pub metadata: Option<Value>,
}

impl Compose {
    /// Text content. Non-string JSON content is treated as empty.
    pub fn text(&self) -> String {
        match &self.content {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty()
            && self.media_url.as_deref().is_none_or(str::is_empty)
            && self.gift_id.as_deref().is_none_or(str::is_empty)
    }

    /// Build a message body with the given default content type.
    pub fn into_body(self, default_type: &str) -> MessageBody {
        let content = self.text();
        MessageBody {
            content,
            content_type: self
                .message_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| default_type.to_string()),
            media_ref: self.media_url.filter(|s| !s.is_empty()),
            gift_ref: self.gift_id.filter(|s| !s.is_empty()),
            metadata: self.metadata.filter(Value::is_object),
            ..MessageBody::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TypingRequest {
    pub is_typing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReadRequest {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PinRequest {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    /// `false` clears the room's pinned message.
    #[serde(default = "default_true", alias = "is_pinned")]
    pub pinned: bool,
}

fn default_true() -> bool {
    true
}

impl ClientFrame {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn live_message_serializes_with_wire_names() {
        let env = ChatEnvelope::new(
            ChatMode::Live,
            "r1",
            ChatEvent::Message(MessageBody {
                sequence: Some(7),
                content: "hi".into(),
                content_type: "text".into(),
                viewer_count: Some(3),
                ..Default::default()
            }),
        )
        .with_message_id("42");

        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["mode"], "live");
        assert_eq!(v["target_id"], "r1");
        assert_eq!(v["seq"], 7);
        assert_eq!(v["message_type"], "text");
        assert_eq!(v["viewer_count"], 3);
        assert!(v.get("is_pinned").is_none());
        assert!(v.get("receiver_id").is_none());
    }

    #[test]
    fn envelope_survives_the_broker_encoding() {
        let env = ChatEnvelope::new(
            ChatMode::Live,
            "r1",
            ChatEvent::System(MessageBody {
                sequence: Some(2),
                content: "welcome".into(),
                content_type: "system".into(),
                system: true,
                ..Default::default()
            }),
        );
        let text = serde_json::to_string(&env).unwrap();
        let back: ChatEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.sequence(), Some(2));
        assert_eq!(back.kind(), "system");
    }

    #[test]
    fn envelope_tolerates_unknown_and_missing_fields() {
        let env: ChatEnvelope = serde_json::from_value(json!({
            "type": "join",
            "sender_avatar": "x.png",
        }))
        .unwrap();
        assert_eq!(env.mode, ChatMode::Private);
        assert_eq!(env.event, ChatEvent::Join(RoomPresenceBody { viewer_count: 0 }));
    }

    #[test]
    fn client_frames_parse_by_type() {
        let frame = ClientFrame::parse(
            r#"{"type":"message","content":"hey","sender_id":"spoofed","seq":99}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Message(c) => assert_eq!(c.text(), "hey"),
            other => panic!("unexpected frame: {other:?}"),
        }

        assert_eq!(
            ClientFrame::parse(r#"{"type":"typing","is_typing":true}"#),
            Some(ClientFrame::Typing(TypingRequest { is_typing: true }))
        );
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"read_receipt"}"#),
            Some(ClientFrame::ReadReceipt(_))
        ));
    }

    #[test]
    fn pin_defaults_to_pinning() {
        let Some(ClientFrame::Pin(pin)) =
            ClientFrame::parse(r#"{"type":"pin","message_id":"1","content":"look"}"#)
        else {
            panic!("pin frame did not parse");
        };
        assert!(pin.pinned);

        let Some(ClientFrame::Pin(unpin)) =
            ClientFrame::parse(r#"{"type":"pin","is_pinned":false}"#)
        else {
            panic!("unpin frame did not parse");
        };
        assert!(!unpin.pinned);
    }

    #[test]
    fn unknown_and_malformed_frames_are_rejected() {
        assert_eq!(ClientFrame::parse(r#"{"type":"join"}"#), None);
        assert_eq!(ClientFrame::parse(r#"{"type":"dance"}"#), None);
        assert_eq!(ClientFrame::parse("not json"), None);
        assert_eq!(ClientFrame::parse(r#"{"content":"no type"}"#), None);
    }

    #[test]
    fn compose_defaults_and_emptiness() {
        let empty = Compose::default();
        assert!(empty.is_empty());

        let gift = Compose {
            gift_id: Some("rose".into()),
            ..Default::default()
        };
        assert!(!gift.is_empty());
        let body = gift.into_body("gift");
        assert_eq!(body.content_type, "gift");
        assert_eq!(body.gift_ref.as_deref(), Some("rose"));

        let non_string = Compose {
            content: Some(json!({"x": 1})),
            ..Default::default()
        };
        assert_eq!(non_string.text(), "");
    }
}
