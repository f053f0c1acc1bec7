//! WebSocket upgrade handler and per-connection read/write loops.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::AppState;

use super::envelope::{ChatEnvelope, ChatMode, ClientFrame, Role};
use super::session::ClientSession;

/// Close codes (4000-range for application-level).
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_BAD_HANDSHAKE: u16 = 4005;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/chat", get(ws_upgrade))
}

/// Handshake query string. Everything is optional at the parsing level so
/// bad values are reported over the socket rather than as an HTTP 400.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub mode: Option<String>,
    pub match_id: Option<String>,
    pub live_stream_id: Option<String>,
    pub is_broadcaster: Option<String>,
    pub last_seq: Option<String>,
}

/// A validated handshake, minus the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub mode: ChatMode,
    pub target_id: String,
    pub role: Role,
    /// Live only. Zero means no catch-up.
    pub last_seq: u64,
}

impl HandshakeQuery {
    pub fn resolve(&self) -> Result<Handshake, &'static str> {
        let mode = match self.mode.as_deref().map(str::trim) {
            None | Some("") | Some("private") => ChatMode::Private,
            Some("live") => ChatMode::Live,
            Some(_) => return Err("Unknown chat mode"),
        };

        let target = match mode {
            ChatMode::Private => self.match_id.as_deref(),
            ChatMode::Live => self.live_stream_id.as_deref(),
        }
        .map(str::trim)
        .filter(|t| !t.is_empty());

        let Some(target_id) = target else {
            return Err(match mode {
                ChatMode::Private => "match_id is required",
                ChatMode::Live => "live_stream_id is required",
            });
        };

        let owner = matches!(self.is_broadcaster.as_deref(), Some("true") | Some("1"));
        let role = match (mode, owner) {
            (ChatMode::Live, true) => Role::Owner,
            _ => Role::Participant,
        };

        let last_seq = match mode {
            ChatMode::Live => self
                .last_seq
                .as_deref()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0),
            ChatMode::Private => 0,
        };

        Ok(Handshake {
            mode,
            target_id: target_id.to_string(),
            role,
            last_seq,
        })
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
}

async fn handle_connection(socket: WebSocket, state: AppState, query: HandshakeQuery) {
    let (mut ws_tx, ws_rx) = socket.split();

    let handshake = match query.resolve() {
        Ok(h) => h,
        Err(reason) => {
            tracing::debug!(%reason, "chat handshake rejected");
            let error = ChatEnvelope::error(ChatMode::Private, "", "bad_request", reason);
            reject(&mut ws_tx, &error, CLOSE_BAD_HANDSHAKE, reason).await;
            return;
        }
    };

    let token = query.token.as_deref().unwrap_or_default();
    let identity = match state.auth.authenticate(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(reason = e.message, "chat authentication failed");
            let error = ChatEnvelope::error(
                handshake.mode,
                &handshake.target_id,
                "unauthorized",
                e.message,
            );
            reject(&mut ws_tx, &error, CLOSE_AUTH_FAILED, e.message).await;
            return;
        }
    };

    let (session, outbound_rx) = ClientSession::new(
        identity,
        handshake.mode,
        handshake.target_id,
        handshake.role,
        state.config.outbound_queue_capacity,
    );

    let catch_up = session.mode == ChatMode::Live && handshake.last_seq > 0;
    if catch_up {
        session.begin_replay();
    }

    state.hub.register(&session).await;

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.user_id(),
        mode = session.mode.as_str(),
        target_id = %session.target_id,
        owner = session.is_owner(),
        "chat session established"
    );

    let writer = tokio::spawn(write_loop(session.clone(), ws_tx, outbound_rx));

    if catch_up {
        state.hub.catch_up(&session, handshake.last_seq).await;
    }

    read_loop(&state, &session, ws_rx).await;

    state.hub.unregister(&session).await;
    if let Err(e) = writer.await {
        tracing::debug!(?e, session_id = %session.session_id, "write loop ended abnormally");
    }

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.user_id(),
        "chat session ended"
    );
}

/// Read client frames until the socket closes or the session is closed.
async fn read_loop(state: &AppState, session: &Arc<ClientSession>, mut ws_rx: WsStream) {
    let limiter = state.limiters.for_mode(session.mode);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(frame) = ClientFrame::parse(text.as_str()) else {
                            tracing::debug!(session_id = %session.session_id, "dropping malformed frame");
                            continue;
                        };

                        if !limiter.allow(session.user_id()) {
                            tracing::debug!(
                                session_id = %session.session_id,
                                limiter = limiter.prefix(),
                                "rate limited"
                            );
                            let error = ChatEnvelope::error(
                                session.mode,
                                &session.target_id,
                                "rate_limited",
                                "Rate limit exceeded. Please slow down.",
                            );
                            state.hub.deliver_to(session, Arc::new(error));
                            continue;
                        }

                        state.hub.route_inbound(session, frame).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }

            _ = session.closed() => break,
        }
    }
}

/// Drain the outbound queue to the socket. Queued frames are flushed before
/// a close is honoured.
async fn write_loop(
    session: Arc<ClientSession>,
    mut ws_tx: WsSink,
    mut outbound: mpsc::Receiver<Arc<ChatEnvelope>>,
) {
    loop {
        tokio::select! {
            biased;

            next = outbound.recv() => {
                let Some(envelope) = next else {
                    break;
                };
                let json = match serde_json::to_string(envelope.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(?e, session_id = %session.session_id, "failed to encode envelope");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    session.close();
                    return;
                }
            }

            _ = session.closed() => break,
        }
    }

    let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "").await;
}

async fn reject(ws_tx: &mut WsSink, error: &ChatEnvelope, code: u16, reason: &str) {
    if let Ok(json) = serde_json::to_string(error) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }
    let _ = send_close(ws_tx, code, reason).await;
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
