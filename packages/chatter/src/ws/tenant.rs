//! Company-scoped chat (`/chat`).
//!
//! The first valid message binds the connection to its company and sender and
//! subscribes it to the company topic. Every valid message is persisted, then
//! published to the topic named by its own `companyCode`. Subscribers never
//! see messages from their own bound sender.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::metrics::ServerMetrics;
use crate::models::ChatMessage;
use crate::store::MessageStore;

use super::engine::{self, ChatMode, Connection, Delivery, Outbound};
use super::protocol::decode_tenant;
use super::registry::TopicRegistry;

pub struct TenantMode {
    registry: TopicRegistry<Delivery<ChatMessage>>,
    store: Arc<dyn MessageStore>,
    metrics: Arc<ServerMetrics>,
}

impl TenantMode {
    pub fn new(store: Arc<dyn MessageStore>, metrics: Arc<ServerMetrics>, capacity: usize) -> Self {
        Self {
            registry: TopicRegistry::with_metrics(Self::NAME, capacity, metrics.clone()),
            store,
            metrics,
        }
    }

    pub fn registry(&self) -> &TopicRegistry<Delivery<ChatMessage>> {
        &self.registry
    }
}

impl ChatMode for TenantMode {
    type Payload = ChatMessage;
    const NAME: &'static str = "tenant";

    async fn receive(&self, conn: &mut Connection<ChatMessage>, text: &str) {
        let message = match decode_tenant(text, conn.identity()) {
            Ok(m) => m,
            Err(e) => {
                engine::reject(&self.metrics, Self::NAME, conn.id(), &e);
                return;
            }
        };

        if let Some(binding) = conn.scope.bind(&message.company_code, &message.sender) {
            info!(
                conn_id = %conn.id(),
                company = %binding.scope_key,
                sender = %binding.sender,
                "Connection bound to company"
            );
            let subscription = self.registry.subscribe(&binding.scope_key);
            conn.attach(subscription);
        }

        let stored = match self.store.persist_chat(message).await {
            Ok(m) => m,
            Err(e) => {
                self.metrics.store_error();
                error!(conn_id = %conn.id(), "Failed to persist chat message: {}", e);
                return;
            }
        };

        let company = stored.company_code.clone();
        match self.registry.publish(&company, Delivery::new(conn.id(), stored)) {
            Some(reached) => {
                self.metrics.message_published();
                debug!(company = %company, reached, "Published chat message");
            }
            None => {
                self.metrics.delivery_gap();
                debug!(company = %company, "No live subscribers for company, message stored only");
            }
        }
    }

    fn admits(&self, own: &Outbound, delivery: &Delivery<ChatMessage>) -> bool {
        match &own.binding {
            Some(binding) => binding.sender != delivery.payload.sender,
            None => true,
        }
    }

    fn encode(&self, delivery: &Delivery<ChatMessage>) -> serde_json::Result<String> {
        serde_json::to_string(delivery.payload.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::RoomMessage;
    use crate::repository::test_helpers;
    use crate::store::StoreError;
    use crate::ws::test_support::{TestClient, eventually};
    use async_trait::async_trait;
    use serde_json::json;

    /// Store that refuses every write.
    pub(crate) struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn persist_chat(&self, _message: ChatMessage) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        async fn persist_room(&self, _message: RoomMessage) -> Result<RoomMessage, StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }

    async fn tenant_mode() -> (Arc<TenantMode>, Arc<ServerMetrics>, crate::repository::ChatRepository) {
        let repo = test_helpers::test_repository().await;
        let metrics = Arc::new(ServerMetrics::new());
        let mode = Arc::new(TenantMode::new(
            Arc::new(repo.clone()),
            metrics.clone(),
            64,
        ));
        (mode, metrics, repo)
    }

    fn chat(sender: &str, company: &str, content: &str) -> serde_json::Value {
        json!({ "sender": sender, "companyCode": company, "content": content })
    }

    /// Wait until `n` messages have gone through publish.
    async fn wait_published(metrics: &ServerMetrics, n: u64) {
        eventually(|| metrics.snapshot().messages.published == n).await;
    }

    async fn wait_for_subscribers(mode: &TenantMode, company: &str, n: usize) {
        let registry = mode.registry().clone();
        let company = company.to_string();
        eventually(move || registry.get(&company).is_some_and(|t| t.subscriber_count() == n)).await;
    }

    #[tokio::test]
    async fn company_isolation_and_echo_suppression() {
        let (mode, metrics, repo) = tenant_mode().await;
        let mut a = TestClient::connect(mode.clone(), metrics.clone(), None);
        let mut b = TestClient::connect(mode.clone(), metrics.clone(), None);
        let mut c = TestClient::connect(mode.clone(), metrics.clone(), None);

        a.send_json(chat("alice", "ACME", "hi"));
        wait_published(&metrics, 1).await;
        b.send_json(chat("bob", "ACME", "yo"));
        wait_published(&metrics, 2).await;
        c.send_json(chat("carol", "GLOBEX", "hey"));
        wait_published(&metrics, 3).await;

        // A was alone when it said "hi"; it only hears B.
        let got = a.recv_json().await;
        assert_eq!(got["sender"], "bob");
        assert_eq!(got["content"], "yo");
        assert_eq!(got["companyCode"], "ACME");
        assert!(got["id"].as_i64().is_some());

        a.send_json(chat("alice", "ACME", "second"));
        let got = b.recv_json().await;
        assert_eq!(got["content"], "second");

        a.assert_silent().await;
        c.assert_silent().await;

        let stored = repo.get_company_history("ACME", 10).await.unwrap();
        let contents: Vec<&str> = stored.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo", "second"]);

        a.close().await;
        b.close().await;
        c.close().await;
    }

    #[tokio::test]
    async fn invalid_frames_are_dropped_without_binding() {
        let (mode, metrics, repo) = tenant_mode().await;
        let a = TestClient::connect(mode.clone(), metrics.clone(), None);

        a.send_text("not json");
        a.send_json(json!({ "sender": "alice", "content": "no company" }));
        a.send_json(json!({ "companyCode": "ACME", "content": "no sender" }));
        a.send_json(chat("alice", "ACME", "finally"));
        wait_published(&metrics, 1).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.errors.decode, 1);
        assert_eq!(snap.errors.validation, 2);
        assert_eq!(repo.get_company_history("ACME", 10).await.unwrap().len(), 1);

        a.close().await;
    }

    #[tokio::test]
    async fn binding_is_fixed_by_the_first_message() {
        let (mode, metrics, _repo) = tenant_mode().await;
        let mut a = TestClient::connect(mode.clone(), metrics.clone(), None);
        let mut b = TestClient::connect(mode.clone(), metrics.clone(), None);

        a.send_json(chat("alice", "ACME", "first"));
        wait_published(&metrics, 1).await;
        b.send_json(chat("bob", "GLOBEX", "elsewhere"));
        wait_published(&metrics, 2).await;

        // A later message naming another company still routes by its own
        // companyCode, but A stays subscribed to ACME only.
        a.send_json(chat("alice", "GLOBEX", "cross-post"));
        let got = b.recv_json().await;
        assert_eq!(got["content"], "cross-post");
        assert!(mode.registry().contains("ACME"));
        assert_eq!(mode.registry().get("GLOBEX").unwrap().subscriber_count(), 1);

        b.send_json(chat("bob", "GLOBEX", "reply"));
        a.assert_silent().await;

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn same_sender_on_two_connections_does_not_echo() {
        let (mode, metrics, _repo) = tenant_mode().await;
        let mut a1 = TestClient::connect(mode.clone(), metrics.clone(), None);
        let mut a2 = TestClient::connect(mode.clone(), metrics.clone(), None);

        a1.send_json(chat("alice", "ACME", "one"));
        wait_published(&metrics, 1).await;
        a2.send_json(chat("alice", "ACME", "two"));
        wait_published(&metrics, 2).await;
        a1.send_json(chat("alice", "ACME", "three"));
        wait_published(&metrics, 3).await;

        a1.assert_silent().await;
        a2.assert_silent().await;

        a1.close().await;
        a2.close().await;
    }

    #[tokio::test]
    async fn last_disconnect_reclaims_topic_and_new_topic_has_no_history() {
        let (mode, metrics, _repo) = tenant_mode().await;
        let a = TestClient::connect(mode.clone(), metrics.clone(), None);
        let b = TestClient::connect(mode.clone(), metrics.clone(), None);

        a.send_json(chat("alice", "ACME", "one"));
        wait_published(&metrics, 1).await;
        b.send_json(chat("bob", "ACME", "two"));
        wait_published(&metrics, 2).await;
        wait_for_subscribers(&mode, "ACME", 2).await;
        let first_generation = mode.registry().get("ACME").unwrap().generation();

        a.close().await;
        assert_eq!(mode.registry().get("ACME").unwrap().subscriber_count(), 1);
        b.close().await;
        assert!(!mode.registry().contains("ACME"));

        let mut c = TestClient::connect(mode.clone(), metrics.clone(), None);
        let mut d = TestClient::connect(mode.clone(), metrics.clone(), None);
        c.send_json(chat("carol", "ACME", "fresh"));
        wait_published(&metrics, 3).await;
        assert!(mode.registry().get("ACME").unwrap().generation() > first_generation);
        d.send_json(chat("dave", "ACME", "hello"));
        wait_published(&metrics, 4).await;

        // Neither sees anything sent before they subscribed.
        assert_eq!(c.recv_json().await["content"], "hello");
        d.assert_silent().await;

        c.close().await;
        d.close().await;
        assert!(mode.registry().is_empty());
    }

    #[tokio::test]
    async fn store_failure_drops_the_message_but_keeps_the_session() {
        let metrics = Arc::new(ServerMetrics::new());
        let failing = Arc::new(TenantMode::new(Arc::new(FailingStore), metrics.clone(), 64));
        let mut a = TestClient::connect(failing.clone(), metrics.clone(), None);
        let b = TestClient::connect(failing.clone(), metrics.clone(), None);

        a.send_json(chat("alice", "ACME", "one"));
        wait_for_subscribers(&failing, "ACME", 1).await;
        b.send_json(chat("bob", "ACME", "lost"));
        wait_for_subscribers(&failing, "ACME", 2).await;
        b.send_json(chat("bob", "ACME", "also lost"));
        eventually(|| metrics.snapshot().errors.store == 3).await;

        a.assert_silent().await;
        let snap = metrics.snapshot();
        assert_eq!(snap.errors.store, 3);
        assert_eq!(snap.messages.published, 0);
        assert_eq!(snap.connections.active, 2);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn authenticated_identity_fills_and_guards_sender() {
        let (mode, metrics, repo) = tenant_mode().await;
        let a = TestClient::connect(mode.clone(), metrics.clone(), Some("alice"));

        a.send_json(json!({ "companyCode": "ACME", "content": "implicit" }));
        a.send_json(chat("mallory", "ACME", "spoofed"));
        a.send_json(chat("alice", "ACME", "explicit"));
        wait_published(&metrics, 2).await;

        let stored = repo.get_company_history("ACME", 10).await.unwrap();
        assert!(stored.iter().all(|m| m.sender == "alice"));
        assert_eq!(stored.len(), 2);
        assert_eq!(metrics.snapshot().errors.validation, 1);

        a.close().await;
    }
}
