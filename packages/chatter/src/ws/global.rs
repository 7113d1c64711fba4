//! Process-wide broadcast (`/global`).
//!
//! Every connection subscribes on accept. Any frame that parses as JSON is
//! forwarded verbatim to every other connection; nothing is persisted.

use std::sync::Arc;
use tracing::debug;

use crate::metrics::ServerMetrics;

use super::engine::{self, ChatMode, Connection, Delivery, Outbound};
use super::protocol::validate_global;
use super::topic::Topic;

pub struct GlobalMode {
    topic: Topic<Delivery<String>>,
    metrics: Arc<ServerMetrics>,
}

impl GlobalMode {
    pub fn new(metrics: Arc<ServerMetrics>, capacity: usize) -> Self {
        Self {
            topic: Topic::new(Self::NAME, capacity, 0),
            metrics,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.topic.subscriber_count()
    }
}

impl ChatMode for GlobalMode {
    type Payload = String;
    const NAME: &'static str = "global";

    fn open(&self, conn: &mut Connection<String>) {
        conn.attach(self.topic.subscribe_detached());
    }

    async fn receive(&self, conn: &mut Connection<String>, text: &str) {
        if let Err(e) = validate_global(text) {
            engine::reject(&self.metrics, Self::NAME, conn.id(), &e);
            return;
        }

        let reached = self.topic.publish(Delivery::new(conn.id(), text.to_string()));
        self.metrics.message_published();
        debug!(conn_id = %conn.id(), reached, "Broadcast global message");
    }

    fn admits(&self, own: &Outbound, delivery: &Delivery<String>) -> bool {
        delivery.origin != own.connection_id
    }

    fn encode(&self, delivery: &Delivery<String>) -> serde_json::Result<String> {
        Ok(delivery.payload.as_ref().clone())
    }
}
