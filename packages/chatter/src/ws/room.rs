//! Room chat (`/room`).
//!
//! CREATE and JOIN bind the connection to a room (first one wins) and subscribe
//! it; CREATE also brings the room's topic into existence. Every valid record
//! is persisted. CHAT records are published only when the sending connection is
//! bound and the room's topic exists; otherwise they are stored and not
//! delivered. Binding actions themselves are never broadcast.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::metrics::ServerMetrics;
use crate::models::{RoomAction, RoomMessage};
use crate::store::MessageStore;

use super::engine::{self, ChatMode, Connection, Delivery, Outbound};
use super::protocol::decode_room;
use super::registry::TopicRegistry;

pub struct RoomMode {
    registry: TopicRegistry<Delivery<RoomMessage>>,
    store: Arc<dyn MessageStore>,
    metrics: Arc<ServerMetrics>,
}

impl RoomMode {
    pub fn new(store: Arc<dyn MessageStore>, metrics: Arc<ServerMetrics>, capacity: usize) -> Self {
        Self {
            registry: TopicRegistry::with_metrics(Self::NAME, capacity, metrics.clone()),
            store,
            metrics,
        }
    }

    pub fn registry(&self) -> &TopicRegistry<Delivery<RoomMessage>> {
        &self.registry
    }

    fn bind(&self, conn: &mut Connection<RoomMessage>, message: &RoomMessage) {
        if message.action == RoomAction::Create {
            self.registry.get_or_create(&message.room_id);
        }

        match conn.scope.bind(&message.room_id, &message.sender) {
            Some(binding) => {
                info!(
                    conn_id = %conn.id(),
                    room = %binding.scope_key,
                    sender = %binding.sender,
                    action = %message.action,
                    "Connection bound to room"
                );
                let subscription = self.registry.subscribe(&binding.scope_key);
                conn.attach(subscription);
            }
            None => {
                debug!(
                    conn_id = %conn.id(),
                    room = %message.room_id,
                    action = %message.action,
                    "Connection already bound, recording action only"
                );
            }
        }
    }

    async fn persist(&self, conn: &Connection<RoomMessage>, message: RoomMessage) -> Option<RoomMessage> {
        match self.store.persist_room(message).await {
            Ok(m) => Some(m),
            Err(e) => {
                self.metrics.store_error();
                error!(conn_id = %conn.id(), "Failed to persist room message: {}", e);
                None
            }
        }
    }
}

impl ChatMode for RoomMode {
    type Payload = RoomMessage;
    const NAME: &'static str = "room";

    async fn receive(&self, conn: &mut Connection<RoomMessage>, text: &str) {
        let message = match decode_room(text) {
            Ok(m) => m,
            Err(e) => {
                engine::reject(&self.metrics, Self::NAME, conn.id(), &e);
                return;
            }
        };

        if message.action.binds_scope() {
            self.bind(conn, &message);
            if let Some(saved) = self.persist(conn, message).await {
                debug!(room = %saved.room_id, sender = %saved.sender, "Saved {} action", saved.action);
            }
            return;
        }

        let Some(stored) = self.persist(conn, message).await else {
            return;
        };

        if !conn.scope.is_bound() {
            self.metrics.delivery_gap();
            warn!(
                conn_id = %conn.id(),
                room = %stored.room_id,
                "CHAT from a connection that never joined a room, stored only"
            );
            return;
        }

        let room = stored.room_id.clone();
        match self.registry.publish(&room, Delivery::new(conn.id(), stored)) {
            Some(reached) => {
                self.metrics.message_published();
                debug!(room = %room, reached, "Published room message");
            }
            None => {
                self.metrics.delivery_gap();
                warn!(room = %room, "No topic for room, message stored only");
            }
        }
    }

    fn admits(&self, own: &Outbound, delivery: &Delivery<RoomMessage>) -> bool {
        if delivery.payload.action != RoomAction::Chat {
            return false;
        }
        match &own.binding {
            Some(binding) => binding.sender != delivery.payload.sender,
            None => true,
        }
    }

    fn encode(&self, delivery: &Delivery<RoomMessage>) -> serde_json::Result<String> {
        serde_json::to_string(delivery.payload.as_ref())
    }
}
