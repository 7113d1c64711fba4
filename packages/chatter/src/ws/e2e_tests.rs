//! End-to-end tests: the real router on a loopback port, real WebSocket clients.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::AppState;
use crate::test_helpers;
use crate::ws::test_support::eventually;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = crate::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn open(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .unwrap();
    ws
}

async fn open_as(addr: SocketAddr, path: &str, user: &str) -> Result<Ws, tungstenite::Error> {
    let mut request = format!("ws://{addr}{path}").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-authenticated-user", user.parse().unwrap());
    tokio_tungstenite::connect_async(request).await.map(|(ws, _)| ws)
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv_text(ws: &mut Ws) -> String {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn recv(ws: &mut Ws) -> Value {
    serde_json::from_str(&recv_text(ws).await).unwrap()
}

async fn assert_silent(ws: &mut Ws) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        tokio::time::timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("expected no frame, got {text}");
    }
}

async fn wait_published(state: &AppState, n: u64) {
    eventually(|| state.metrics.snapshot().messages.published == n).await;
}

#[tokio::test]
async fn acme_scenario() {
    let state = test_helpers::test_app_state().await;
    let addr = spawn_server(state.clone()).await;

    let mut alice = open(addr, "/chat").await;
    let mut bob = open(addr, "/chat").await;

    send(&mut alice, json!({"sender": "alice", "content": "hi", "companyCode": "ACME"})).await;
    wait_published(&state, 1).await;
    send(&mut bob, json!({"sender": "bob", "content": "here", "companyCode": "ACME"})).await;
    wait_published(&state, 2).await;

    let got = recv(&mut alice).await;
    assert_eq!(got["sender"], "bob");
    assert_eq!(got["content"], "here");

    send(&mut alice, json!({"sender": "alice", "content": "hello bob", "companyCode": "ACME"})).await;
    let got = recv(&mut bob).await;
    assert_eq!(got["sender"], "alice");
    assert_eq!(got["content"], "hello bob");
    assert_eq!(got["companyCode"], "ACME");
    assert!(got["timestamp"].as_i64().unwrap() > 0);

    assert_silent(&mut alice).await;

    let history = state.repository.get_company_history("ACME", 10).await.unwrap();
    assert_eq!(history.len(), 3);

    alice.close(None).await.unwrap();
    bob.close(None).await.unwrap();
    let registry = state.tenant.registry().clone();
    eventually(|| registry.is_empty()).await;
    eventually(|| state.metrics.snapshot().connections.active == 0).await;
}

#[tokio::test]
async fn global_every_client_gets_every_other_message_once() {
    const N: usize = 4;
    const M: usize = 5;

    let state = test_helpers::test_app_state().await;
    let addr = spawn_server(state.clone()).await;

    let mut clients = Vec::new();
    for _ in 0..N {
        clients.push(open(addr, "/global").await);
    }
    let global = state.global.clone();
    eventually(|| global.subscriber_count() == N).await;

    for seq in 0..M {
        for (from, ws) in clients.iter_mut().enumerate() {
            send(ws, json!({"from": from, "seq": seq})).await;
        }
    }

    for (me, ws) in clients.iter_mut().enumerate() {
        let mut seen = HashSet::new();
        for _ in 0..(N * M - M) {
            let got = recv(ws).await;
            let from = got["from"].as_u64().unwrap() as usize;
            let seq = got["seq"].as_u64().unwrap() as usize;
            assert_ne!(from, me, "client {me} received its own message");
            assert!(seen.insert((from, seq)), "duplicate delivery to {me}");
        }
        assert_silent(ws).await;
    }
}

#[tokio::test]
async fn global_invalid_json_is_not_forwarded() {
    let state = test_helpers::test_app_state().await;
    let addr = spawn_server(state.clone()).await;

    let mut a = open(addr, "/global").await;
    let mut b = open(addr, "/global").await;
    let global = state.global.clone();
    eventually(|| global.subscriber_count() == 2).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    a.send(Message::Text(r#"{"ok":true}"#.into())).await.unwrap();
    assert_eq!(recv_text(&mut b).await, r#"{"ok":true}"#);
    assert_silent(&mut b).await;
    assert_eq!(state.metrics.snapshot().errors.decode, 1);
}

#[tokio::test]
async fn room_lifecycle_over_the_wire() {
    let state = test_helpers::test_app_state().await;
    let addr = spawn_server(state.clone()).await;

    let mut owner = open(addr, "/room").await;
    let mut guest = open(addr, "/room").await;

    send(&mut owner, json!({"sender": "olga", "roomId": "r1", "action": "CREATE"})).await;
    let registry = state.room.registry().clone();
    eventually(|| registry.get("r1").is_some_and(|t| t.subscriber_count() == 1)).await;
    send(&mut guest, json!({"sender": "gus", "roomId": "r1", "action": "JOIN"})).await;
    eventually(|| registry.get("r1").is_some_and(|t| t.subscriber_count() == 2)).await;

    send(&mut guest, json!({"sender": "gus", "roomId": "r1", "action": "CHAT", "content": "hey"})).await;
    let got = recv(&mut owner).await;
    assert_eq!(got["action"], "CHAT");
    assert_eq!(got["content"], "hey");
    assert_eq!(got["roomId"], "r1");
    assert_silent(&mut guest).await;

    drop(owner);
    drop(guest);
    eventually(|| registry.is_empty()).await;

    let history = state.repository.get_room_history("r1", 10).await.unwrap();
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn tenant_requires_identity_when_auth_enabled() {
    let state = test_helpers::test_app_state_with_auth().await;
    let addr = spawn_server(state.clone()).await;

    match tokio_tungstenite::connect_async(format!("ws://{addr}/chat")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("anonymous tenant connection was accepted"),
    }

    // Room and global stay open to everyone.
    open(addr, "/room").await;
    open(addr, "/global").await;

    let mut alice = open_as(addr, "/chat", "alice").await.unwrap();
    let mut bob = open_as(addr, "/chat", "bob").await.unwrap();
    send(&mut alice, json!({"content": "who am i", "companyCode": "ACME"})).await;
    wait_published(&state, 1).await;
    send(&mut bob, json!({"sender": "alice", "content": "spoof", "companyCode": "ACME"})).await;
    send(&mut bob, json!({"content": "honest", "companyCode": "ACME"})).await;
    wait_published(&state, 2).await;

    let got = recv(&mut alice).await;
    assert_eq!(got["sender"], "bob");
    assert_eq!(got["content"], "honest");
    assert_eq!(state.metrics.snapshot().errors.validation, 1);

    let senders: Vec<String> = state
        .repository
        .get_company_history("ACME", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.sender)
        .collect();
    assert_eq!(senders, vec!["alice", "bob"]);
}
