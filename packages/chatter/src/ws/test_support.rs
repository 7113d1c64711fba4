//! In-memory connection harness for engine and mode tests.

use axum::extract::ws::Message;
use futures::StreamExt;
use futures::channel::mpsc;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::metrics::ServerMetrics;

use super::engine::{self, ChatMode};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Client side of a connection driven by [`engine::run`] over channels.
pub(crate) struct TestClient {
    to_server: Option<mpsc::UnboundedSender<Result<Message, Infallible>>>,
    from_server: Option<mpsc::UnboundedReceiver<Message>>,
    handle: JoinHandle<()>,
}

impl TestClient {
    pub(crate) fn connect<M: ChatMode>(
        mode: Arc<M>,
        metrics: Arc<ServerMetrics>,
        identity: Option<&str>,
    ) -> Self {
        let (to_server, server_rx) = mpsc::unbounded();
        let (server_tx, from_server) = mpsc::unbounded();
        let handle = tokio::spawn(engine::run(
            mode,
            metrics,
            identity.map(str::to_string),
            server_tx,
            server_rx,
        ));
        Self {
            to_server: Some(to_server),
            from_server: Some(from_server),
            handle,
        }
    }

    fn push(&self, message: Message) {
        if let Some(tx) = &self.to_server {
            tx.unbounded_send(Ok(message)).unwrap();
        }
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.push(Message::Text(text.into()));
    }

    pub(crate) fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    pub(crate) fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Message::Binary(bytes.into()));
    }

    pub(crate) fn send_close(&self) {
        self.push(Message::Close(None));
    }

    /// Stop reading; the server's next write to this client fails.
    pub(crate) fn drop_receiver(&mut self) {
        self.from_server = None;
    }

    pub(crate) async fn recv_text(&mut self) -> String {
        let rx = self.from_server.as_mut().expect("receiver dropped");
        match tokio::time::timeout(RECV_TIMEOUT, rx.next()).await {
            Ok(Some(Message::Text(text))) => text.as_str().to_string(),
            Ok(other) => panic!("expected a text frame, got {other:?}"),
            Err(_) => panic!("timed out waiting for a frame"),
        }
    }

    pub(crate) async fn recv_json(&mut self) -> serde_json::Value {
        let text = self.recv_text().await;
        serde_json::from_str(&text).expect("server sent invalid JSON")
    }

    /// Assert nothing arrives for a short while.
    pub(crate) async fn assert_silent(&mut self) {
        let rx = self.from_server.as_mut().expect("receiver dropped");
        if let Ok(Some(frame)) = tokio::time::timeout(QUIET_PERIOD, rx.next()).await {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Wait for the server side of the connection to finish.
    pub(crate) async fn join(self) {
        tokio::time::timeout(RECV_TIMEOUT, self.handle)
            .await
            .expect("connection did not shut down")
            .expect("connection task panicked");
    }

    /// End the inbound stream and wait for teardown.
    pub(crate) async fn close(mut self) {
        self.to_server = None;
        self.join().await;
    }
}

/// Poll `cond` until it holds, failing the test after a timeout.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
