#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_gateway::config::Config;
use chat_gateway::db::messages::MemoryMessageStore;
use chat_gateway::db::threads::MemoryThreads;
use chat_gateway::{AppState, Backends};

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Claims for minting handshake tokens.
#[derive(Debug, Serialize)]
pub struct TestClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub exp: i64,
}

pub fn mint_token(user_id: &str, name: Option<&str>) -> String {
    let claims = TestClaims {
        sub: user_id.to_string(),
        name: name.map(str::to_string),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(300)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

pub fn mint_expired_token(user_id: &str) -> String {
    let claims = TestClaims {
        sub: user_id.to_string(),
        name: None,
        exp: (chrono::Utc::now() - chrono::Duration::seconds(600)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint expired token")
}

/// A gateway running on in-memory backends, with handles on the stores the
/// tests need to seed or inspect.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub threads: Arc<MemoryThreads>,
    pub messages: Arc<MemoryMessageStore>,
}

pub fn test_state(config: Config) -> (AppState, Arc<MemoryThreads>, Arc<MemoryMessageStore>) {
    let messages = Arc::new(MemoryMessageStore::new());
    let threads = Arc::new(MemoryThreads::new(messages.clone()));
    let backends = Backends {
        messages: messages.clone(),
        threads: threads.clone(),
        ..Backends::in_memory(&config)
    };
    (AppState::new(config, backends), threads, messages)
}

/// Start a real TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_gateway() -> TestGateway {
    start_gateway_with(Config::local(TEST_SECRET)).await
}

pub async fn start_gateway_with(config: Config) -> TestGateway {
    let (state, threads, messages) = test_state(config);
    let app = chat_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        addr,
        state,
        threads,
        messages,
    }
}

impl TestGateway {
    pub async fn connect(&self, query: &str) -> WsClient {
        let url = format!("ws://{}/ws/chat?{query}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        ws
    }

    pub async fn connect_private(&self, user_id: &str, match_id: &str) -> WsClient {
        let token = mint_token(user_id, None);
        self.connect(&format!("token={token}&mode=private&match_id={match_id}"))
            .await
    }

    /// Connect to a live room and wait for the session's own `join`.
    pub async fn connect_live(&self, user_id: &str, room_id: &str, owner: bool) -> WsClient {
        let token = mint_token(user_id, Some(user_id));
        let mut ws = self
            .connect(&format!(
                "token={token}&mode=live&live_stream_id={room_id}&is_broadcaster={owner}"
            ))
            .await;
        loop {
            let frame = next_frame(&mut ws).await;
            if frame["type"] == "join" && frame["sender_id"] == user_id {
                return ws;
            }
        }
    }

    pub async fn wait_for_private_sessions(&self, count: usize) {
        wait_until(|| self.state.hub.private_sessions() == count).await;
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// Next text frame as JSON. Panics on timeout or close.
pub async fn next_frame(ws: &mut WsClient) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("parse frame");
            }
            Message::Close(frame) => panic!("socket closed: {frame:?}"),
            _ => continue,
        }
    }
}

/// Next frame whose `type` is `kind`, skipping any others.
pub async fn next_of_type(ws: &mut WsClient, kind: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Assert that no text frame of `kind` arrives within `wait`.
pub async fn assert_no_frame_of_type(ws: &mut WsClient, kind: &str, wait: Duration) {
    let deadline = time::Instant::now() + wait;
    loop {
        match time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str()).expect("parse frame");
                assert_ne!(frame["type"], kind, "unexpected frame: {frame}");
            }
            Ok(Some(Ok(Message::Close(frame)))) => panic!("socket closed: {frame:?}"),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => panic!("ws read error: {e}"),
            Ok(None) => panic!("stream ended"),
        }
    }
}
