mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use common::{
    assert_no_frame_of_type, mint_expired_token, next_frame, next_of_type, send_json,
    start_gateway, wait_until,
};

#[tokio::test]
async fn both_participants_receive_sent_message() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut alice = gw.connect_private("alice", "m1").await;
    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    send_json(
        &mut alice,
        json!({
            "type": "message",
            "content": "hi bob",
            "sender_id": "mallory",
        }),
    )
    .await;

    let to_bob = next_of_type(&mut bob, "message").await;
    let echo = next_of_type(&mut alice, "message").await;

    for frame in [&to_bob, &echo] {
        assert_eq!(frame["mode"], "private");
        assert_eq!(frame["target_id"], "m1");
        assert_eq!(frame["content"], "hi bob");
        assert_eq!(frame["message_type"], "text");
        assert_eq!(frame["sender_id"], "alice");
        assert_eq!(frame["receiver_id"], "bob");
        assert_eq!(frame["delivery_status"], "sent");
        assert!(frame.get("seq").is_none());
    }
    assert_eq!(to_bob["message_id"], echo["message_id"]);

    let id: i64 = to_bob["message_id"].as_str().unwrap().parse().unwrap();
    wait_until(|| gw.messages.get(id).is_some()).await;
    let row = gw.messages.get(id).unwrap();
    assert_eq!(row.match_id.as_deref(), Some("m1"));
    assert!(!row.is_live);
}

#[tokio::test]
async fn typing_and_read_receipts_reach_the_other_party() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut alice = gw.connect_private("alice", "m1").await;
    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    send_json(&mut alice, json!({ "type": "typing", "is_typing": true })).await;
    let typing = next_of_type(&mut bob, "typing").await;
    assert_eq!(typing["is_typing"], true);
    assert_eq!(typing["sender_id"], "alice");

    send_json(&mut alice, json!({ "type": "message", "content": "read me" })).await;
    let msg = next_of_type(&mut bob, "message").await;
    let id = msg["message_id"].as_str().unwrap().to_string();
    let numeric: i64 = id.parse().unwrap();
    wait_until(|| gw.messages.get(numeric).is_some()).await;

    send_json(&mut bob, json!({ "type": "read_receipt" })).await;
    let receipt = next_of_type(&mut alice, "read_receipt").await;
    assert_eq!(receipt["sender_id"], "bob");
    assert_eq!(receipt["delivery_status"], "read");
    assert_eq!(receipt["message_ids"], json!([id]));
    assert!(gw.messages.get(numeric).unwrap().is_read);

    // Alice never sees her own typing indicator.
    assert_no_frame_of_type(&mut alice, "typing", Duration::from_millis(200)).await;
}

#[tokio::test]
async fn blocked_users_cannot_message() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");
    gw.threads.add_block("bob", "alice");

    let mut alice = gw.connect_private("alice", "m1").await;
    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    send_json(&mut alice, json!({ "type": "message", "content": "hello?" })).await;

    assert_no_frame_of_type(&mut bob, "message", Duration::from_millis(300)).await;
    assert_no_frame_of_type(&mut alice, "message", Duration::from_millis(50)).await;
    assert!(gw.messages.is_empty());
}

#[tokio::test]
async fn non_participants_cannot_message_a_match() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut mallory = gw.connect_private("mallory", "m1").await;
    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    send_json(&mut mallory, json!({ "type": "message", "content": "psst" })).await;

    assert_no_frame_of_type(&mut bob, "message", Duration::from_millis(300)).await;
    assert!(gw.messages.is_empty());
}

#[tokio::test]
async fn bad_token_gets_error_then_close() {
    let gw = start_gateway().await;

    for token in ["garbage".to_string(), mint_expired_token("alice")] {
        let mut ws = gw
            .connect(&format!("token={token}&mode=private&match_id=m1"))
            .await;

        let error = next_frame(&mut ws).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "unauthorized");

        let close = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws read error");
        match close {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4004),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
    assert_eq!(gw.state.hub.private_sessions(), 0);
}

#[tokio::test]
async fn missing_match_id_is_rejected() {
    let gw = start_gateway().await;
    let token = common::mint_token("alice", None);
    let mut ws = gw.connect(&format!("token={token}&mode=private")).await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "bad_request");
}

#[tokio::test]
async fn malformed_frames_do_not_disconnect() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut alice = gw.connect_private("alice", "m1").await;
    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    alice
        .send(Message::Text("not json at all".into()))
        .await
        .unwrap();
    send_json(&mut alice, json!({ "type": "dance" })).await;
    send_json(&mut alice, json!({ "type": "message", "content": "still here" })).await;

    let msg = next_of_type(&mut bob, "message").await;
    assert_eq!(msg["content"], "still here");
}

#[tokio::test]
async fn presence_follows_the_connection() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut alice = gw.connect_private("alice", "m1").await;
    gw.wait_for_private_sessions(1).await;

    let presence = gw.state.presence.clone();
    wait_for_online(&presence, "alice", true).await;

    alice.close(None).await.unwrap();
    gw.wait_for_private_sessions(0).await;
    wait_for_online(&presence, "alice", false).await;
}

#[tokio::test]
async fn a_second_connection_replaces_the_first() {
    let gw = start_gateway().await;
    gw.threads.add_match("m1", "alice", "bob");

    let mut first = gw.connect_private("alice", "m1").await;
    gw.wait_for_private_sessions(1).await;
    let mut second = gw.connect_private("alice", "m1").await;

    // The displaced socket is closed by the server.
    let closed = time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "displaced session was not closed");

    let mut bob = gw.connect_private("bob", "m1").await;
    gw.wait_for_private_sessions(2).await;

    send_json(&mut bob, json!({ "type": "message", "content": "which one?" })).await;
    let msg = next_of_type(&mut second, "message").await;
    assert_eq!(msg["content"], "which one?");
}

async fn wait_for_online(
    presence: &chat_gateway::gateway::presence::Presence,
    user_id: &str,
    online: bool,
) {
    time::timeout(Duration::from_secs(5), async {
        loop {
            let status = presence.status(user_id).await.unwrap();
            if status.is_some_and(|s| s.online == online) {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("presence did not settle");
}
