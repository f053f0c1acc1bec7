mod common;

use axum_test::TestServer;
use serde_json::{json, Value};

use chat_gateway::config::Config;
use chat_gateway::gateway::envelope::{ChatEnvelope, ChatEvent, ChatMode, PinBody};

fn server() -> (TestServer, chat_gateway::AppState) {
    let (state, _threads, _messages) = common::test_state(Config::local(common::TEST_SECRET));
    let app = chat_gateway::routes::router().with_state(state.clone());
    (TestServer::new(app).unwrap(), state)
}

#[tokio::test]
async fn health_returns_ok() {
    let (server, _) = server();
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    resp.assert_json(&json!({ "status": "ok" }));
}

#[tokio::test]
async fn unknown_room_has_no_viewers_and_no_pin() {
    let (server, _) = server();

    let viewers: Value = server.get("/live/nope/viewers").await.json();
    assert_eq!(viewers, json!({ "room_id": "nope", "viewer_count": 0 }));

    let pinned: Value = server.get("/live/nope/pinned").await.json();
    assert_eq!(pinned, json!({ "pinned_message": null }));
}

#[tokio::test]
async fn pinned_endpoint_returns_the_stored_envelope() {
    let (server, state) = server();
    let pin = ChatEnvelope::new(
        ChatMode::Live,
        "r1",
        ChatEvent::Pin(PinBody {
            content: "hello".into(),
            pinned: true,
        }),
    )
    .with_message_id("5");
    state.presence.set_pinned("r1", &pin).await.unwrap();

    let body: Value = server.get("/live/r1/pinned").await.json();
    assert_eq!(body["pinned_message"]["type"], "pin");
    assert_eq!(body["pinned_message"]["content"], "hello");
    assert_eq!(body["pinned_message"]["message_id"], "5");
}

#[tokio::test]
async fn presence_endpoint_reports_online_and_unknown_users() {
    let (server, state) = server();

    let unknown: Value = server.get("/presence/ghost").await.json();
    assert_eq!(unknown["online"], false);
    assert_eq!(unknown["last_seen_at"], Value::Null);

    state.presence.mark_online("alice").await.unwrap();
    let alice: Value = server.get("/presence/alice").await.json();
    assert_eq!(alice["user_id"], "alice");
    assert_eq!(alice["online"], true);
    assert!(alice["last_seen_at"].is_string());
}

#[tokio::test]
async fn openapi_document_lists_the_endpoints() {
    use utoipa::OpenApi;

    let doc = serde_json::to_value(chat_gateway::routes::ApiDoc::openapi()).unwrap();
    for path in [
        "/health",
        "/live/{room_id}/viewers",
        "/live/{room_id}/pinned",
        "/presence/{user_id}",
    ] {
        assert!(doc["paths"].get(path).is_some(), "missing {path}");
    }
}
