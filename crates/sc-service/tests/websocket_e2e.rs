//! End-to-end tests over a real WebSocket listener.
//!
//! Uses `TestScServer` to bind the signaling router on a random local port
//! and `WsTestClient` to speak the JSON protocol.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::time::Duration;

use sc_test_utils::{TestScServer, WsFrame, WsTestClient};
use serde_json::json;

/// Close code sent when the server closes a session.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when a connection is refused.
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Connect two sockets and bring them into a call on `topic`.
///
/// Returns `((initiator, initiator_id), (responder, responder_id))`.
async fn establish(
    server: &TestScServer,
    topic: &str,
) -> Result<((WsTestClient, String), (WsTestClient, String)), anyhow::Error> {
    let (mut alice, alice_id) = WsTestClient::connect_ready(&server.ws_url("alice")).await?;
    let (mut bob, bob_id) = WsTestClient::connect_ready(&server.ws_url("bob")).await?;

    alice
        .send_json(&json!({"type": "find_match", "topic": topic}))
        .await?;
    alice.expect_type("waiting").await?;
    bob.send_json(&json!({"type": "find_match", "topic": topic}))
        .await?;

    let alice_proposal = alice.expect_type("match_proposal").await?;
    let bob_proposal = bob.expect_type("match_proposal").await?;
    assert_eq!(alice_proposal["matchId"], bob_proposal["matchId"]);
    assert_eq!(alice_proposal["partnerLabel"], "bob");
    assert_eq!(bob_proposal["partnerLabel"], "alice");
    assert_eq!(alice_proposal["topic"], topic);

    alice.send_json(&json!({"type": "accept_match"})).await?;
    bob.send_json(&json!({"type": "accept_match"})).await?;

    let alice_established = alice.expect_type("match_established").await?;
    let bob_established = bob.expect_type("match_established").await?;
    assert_eq!(alice_established["partnerId"], bob_id.as_str());
    assert_eq!(alice_established["initiator"], true);
    assert_eq!(bob_established["partnerId"], alice_id.as_str());
    assert_eq!(bob_established["initiator"], false);

    Ok(((alice, alice_id), (bob, bob_id)))
}

#[tokio::test]
async fn test_connect_receives_participant_id() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (_client, participant_id) =
        WsTestClient::connect_ready(&server.ws_url("alice")).await?;

    assert!(!participant_id.is_empty());
    let status = server.matchmaker().get_status().await?;
    assert_eq!(status.participants, 1);

    Ok(())
}

#[tokio::test]
async fn test_full_call_and_relay_over_websocket() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let ((mut alice, alice_id), (mut bob, bob_id)) = establish(&server, "Politics").await?;

    let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n"});
    alice
        .send_json(&json!({"type": "offer", "payload": offer}))
        .await?;
    let relayed = bob.expect_type("offer").await?;
    assert_eq!(relayed["payload"], offer);
    assert_eq!(relayed["sender"], alice_id.as_str());

    bob.send_json(&json!({"type": "answer", "payload": {"sdp": "answer"}}))
        .await?;
    let answer = alice.expect_type("answer").await?;
    assert_eq!(answer["sender"], bob_id.as_str());

    bob.send_json(&json!({"type": "ice_candidate", "payload": {"candidate": "c1"}}))
        .await?;
    let candidate = alice.expect_type("ice_candidate").await?;
    assert_eq!(candidate["payload"]["candidate"], "c1");

    bob.send_json(&json!({"type": "leave"})).await?;
    bob.expect_type("left_call").await?;
    let peer_left = alice.expect_type("peer_left").await?;
    assert_eq!(peer_left["reason"], "left");

    Ok(())
}

#[tokio::test]
async fn test_socket_close_notifies_partner() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let ((mut alice, _), (mut bob, _)) = establish(&server, "Tech").await?;

    alice.close().await?;

    let peer_left = bob.expect_type("peer_left").await?;
    assert_eq!(peer_left["reason"], "disconnected");

    // Bob is idle again and can search
    bob.send_json(&json!({"type": "find_match", "topic": "Tech"}))
        .await?;
    bob.expect_type("waiting").await?;

    Ok(())
}

#[tokio::test]
async fn test_invalid_frames_are_answered_without_closing() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (mut client, _) = WsTestClient::connect_ready(&server.ws_url("alice")).await?;

    client.send_text("{not json").await?;
    let error = client.expect_type("error").await?;
    assert_eq!(error["code"], 1);

    client.send_json(&json!({"type": "teleport"})).await?;
    let error = client.expect_type("error").await?;
    assert_eq!(error["code"], 1);

    client.send_binary(vec![0xde, 0xad]).await?;
    let error = client.expect_type("error").await?;
    assert_eq!(error["code"], 1);

    // Accept without a proposal is a protocol violation
    client.send_json(&json!({"type": "accept_match"})).await?;
    let error = client.expect_type("error").await?;
    assert_eq!(error["code"], 8);

    // The session survives all of the above
    client
        .send_json(&json!({"type": "find_match", "topic": "Politics"}))
        .await?;
    client.expect_type("waiting").await?;

    Ok(())
}

#[tokio::test]
async fn test_topic_and_label_normalization() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (mut anonymous, _) =
        WsTestClient::connect_ready(&server.ws_url_anonymous()).await?;
    let (mut named, _) = WsTestClient::connect_ready(&server.ws_url("carol")).await?;

    // Blank topic falls back to the default topic
    anonymous
        .send_json(&json!({"type": "find_match", "topic": "   "}))
        .await?;
    let waiting = anonymous.expect_type("waiting").await?;
    assert_eq!(waiting["topic"], "general");

    // Legacy event name, email alias for the label, no topic
    named
        .send_json(&json!({"type": "find-match", "email": "  carol@example.com  "}))
        .await?;
    let proposal = named.expect_type("match_proposal").await?;
    assert_eq!(proposal["partnerLabel"], "Anonymous");
    assert_eq!(proposal["topic"], "general");

    let proposal = anonymous.expect_type("match_proposal").await?;
    assert_eq!(proposal["partnerLabel"], "carol@example.com");

    Ok(())
}

#[tokio::test]
async fn test_oversize_topic_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (mut client, _) = WsTestClient::connect_ready(&server.ws_url("alice")).await?;

    let topic = "x".repeat(server.config().input_limits.max_topic_length + 1);
    client
        .send_json(&json!({"type": "find_match", "topic": topic}))
        .await?;
    let error = client.expect_type("error").await?;
    assert_eq!(error["code"], 1);
    assert_eq!(server.matchmaker().get_status().await?.waiting, 0);

    Ok(())
}

#[tokio::test]
async fn test_connection_refused_at_capacity() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn_with(HashMap::from([(
        "SC_MAX_PARTICIPANTS".to_string(),
        "1".to_string(),
    )]))
    .await?;
    let (_first, _) = WsTestClient::connect_ready(&server.ws_url("first")).await?;

    let mut second = WsTestClient::connect(&server.ws_url("second")).await?;
    let error = second.expect_type("error").await?;
    assert_eq!(error["code"], 7);
    assert_eq!(second.expect_close().await?, Some(CLOSE_TRY_AGAIN_LATER));

    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (mut client, _) = WsTestClient::connect_ready(&server.ws_url("alice")).await?;

    server.begin_shutdown();

    if let Some(code) = client.expect_close().await? {
        assert_eq!(code, CLOSE_GOING_AWAY);
    }

    // The session unregistered its participant on the way out
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = server.matchmaker().get_status().await?;
        if status.participants == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "participant still registered after shutdown"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    Ok(())
}

#[tokio::test]
async fn test_server_pings_keep_idle_session_alive() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn().await?;
    let (mut client, _) = WsTestClient::connect_ready(&server.ws_url("alice")).await?;

    // Pings arrive every second and are skipped; nothing else should
    client.expect_silence(Duration::from_millis(2500)).await?;

    client
        .send_json(&json!({"type": "find_match", "topic": "Tech"}))
        .await?;
    client.expect_type("waiting").await?;

    Ok(())
}

#[tokio::test]
async fn test_unresponsive_client_is_dropped_and_partner_notified() -> Result<(), anyhow::Error> {
    let server = TestScServer::spawn_with(HashMap::from([
        ("SC_PING_INTERVAL_SECONDS".to_string(), "1".to_string()),
        ("SC_LIVENESS_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ]))
    .await?;
    let ((mut alice, _), (mut bob, _)) = establish(&server, "Tech").await?;
    assert_eq!(server.matchmaker().get_status().await?.participants, 2);

    // Alice stops reading, so her client never answers the server's pings.
    // Bob keeps reading and his pongs keep him alive.
    let peer_left = match bob.next_frame(Duration::from_secs(6)).await? {
        WsFrame::Event(event) => event,
        other => anyhow::bail!("Expected peer_left, got {:?}", other),
    };
    assert_eq!(peer_left["type"], "peer_left");
    assert_eq!(peer_left["reason"], "disconnected");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = server.matchmaker().get_status().await?;
        if status.participants == 1 {
            assert_eq!(status.active_calls, 0);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "unresponsive participant still registered"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Bob is idle and still served
    bob.send_json(&json!({"type": "find_match", "topic": "Tech"}))
        .await?;
    bob.expect_type("waiting").await?;

    // Alice finds her session closed once she reads again
    if let Some(code) = alice.expect_close().await? {
        assert_eq!(code, CLOSE_GOING_AWAY);
    }

    Ok(())
}
