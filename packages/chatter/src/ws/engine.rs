//! Fan-out engine
//!
//! Drives one connection end to end:
//! - the receive pipeline hands each text frame to the endpoint's [`ChatMode`]
//!   (decode → validate → bind → persist → publish), strictly in order;
//! - the send pipeline waits until the connection is attached to a topic, then
//!   forwards every delivery the mode admits (echo suppression) to the socket.
//!
//! Both pipelines run inside one `select!`. Whichever ends first (client
//! close, read error, write error) drops the other, and dropping the send
//! pipeline drops its [`Subscription`], which lets the registry reclaim the
//! topic if this was its last subscriber.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::ServerMetrics;

use super::binding::{ScopeBinding, ScopeResolver};
use super::protocol::FrameError;
use super::topic::{Recv, Subscription};

pub type ConnectionId = Uuid;

/// One published item: the payload and the connection that published it.
pub struct Delivery<T> {
    pub origin: ConnectionId,
    pub payload: Arc<T>,
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin,
            payload: self.payload.clone(),
        }
    }
}

impl<T> Delivery<T> {
    pub fn new(origin: ConnectionId, payload: T) -> Self {
        Self {
            origin,
            payload: Arc::new(payload),
        }
    }
}

/// What the send pipeline knows about its own connection. Fixed at attach time.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub connection_id: ConnectionId,
    pub binding: Option<ScopeBinding>,
}

/// Handed from the receive pipeline to the send pipeline, once.
pub struct Attachment<T> {
    pub outbound: Outbound,
    pub subscription: Subscription<Delivery<T>>,
}

/// Session state owned by the receive pipeline.
pub struct Connection<T> {
    id: ConnectionId,
    identity: Option<String>,
    pub scope: ScopeResolver,
    attach_tx: Option<oneshot::Sender<Attachment<T>>>,
}

impl<T> Connection<T> {
    fn new(identity: Option<String>, attach_tx: oneshot::Sender<Attachment<T>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            scope: ScopeResolver::new(),
            attach_tx: Some(attach_tx),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Authenticated user supplied by the transport, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.attach_tx.is_none()
    }

    /// Start the send pipeline on `subscription`. The current scope binding
    /// is captured for echo suppression. Only the first call has an effect.
    pub fn attach(&mut self, subscription: Subscription<Delivery<T>>) {
        let Some(tx) = self.attach_tx.take() else {
            warn!(conn_id = %self.id, scope = subscription.key(), "Connection already attached, ignoring subscription");
            return;
        };
        let attachment = Attachment {
            outbound: Outbound {
                connection_id: self.id,
                binding: self.scope.binding().cloned(),
            },
            subscription,
        };
        if tx.send(attachment).is_err() {
            debug!(conn_id = %self.id, "Send pipeline already gone");
        }
    }
}

/// Endpoint-specific behavior plugged into the engine.
pub trait ChatMode: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    /// Label used in logs.
    const NAME: &'static str;

    /// Called once when the connection is accepted, before any frame is read.
    fn open(&self, _conn: &mut Connection<Self::Payload>) {}

    /// Handle one inbound text frame. Nothing is ever reported back to the
    /// client; failures are logged and the frame is dropped.
    fn receive(
        &self,
        conn: &mut Connection<Self::Payload>,
        text: &str,
    ) -> impl Future<Output = ()> + Send;

    /// Whether `delivery` should be written to the connection described by `own`.
    fn admits(&self, own: &Outbound, delivery: &Delivery<Self::Payload>) -> bool;

    fn encode(&self, delivery: &Delivery<Self::Payload>) -> serde_json::Result<String>;
}

/// Count and log a dropped inbound frame.
pub(crate) fn reject(
    metrics: &ServerMetrics,
    mode: &'static str,
    conn_id: ConnectionId,
    err: &FrameError,
) {
    match err {
        FrameError::Decode(_) => metrics.decode_error(),
        FrameError::Invalid(_) => metrics.validation_error(),
    }
    warn!(mode, conn_id = %conn_id, "Dropping frame: {}", err);
}

/// Run an axum WebSocket through `mode` until either direction closes.
pub async fn serve_socket<M: ChatMode>(
    socket: WebSocket,
    mode: Arc<M>,
    metrics: Arc<ServerMetrics>,
    identity: Option<String>,
) {
    let (sink, stream) = socket.split();
    run(mode, metrics, identity, sink, stream).await;
}

/// Run one connection over any duplex frame transport.
pub async fn run<M, Tx, Rx, E>(
    mode: Arc<M>,
    metrics: Arc<ServerMetrics>,
    identity: Option<String>,
    mut sink: Tx,
    mut stream: Rx,
) where
    M: ChatMode,
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display,
{
    let (attach_tx, attach_rx) = oneshot::channel::<Attachment<M::Payload>>();
    let mut conn = Connection::new(identity, attach_tx);
    let conn_id = conn.id();

    metrics.connection_opened();
    info!(mode = M::NAME, conn_id = %conn_id, "New WebSocket connection");

    mode.open(&mut conn);

    let receive = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    metrics.frame_received();
                    mode.receive(&mut conn, text.as_str()).await;
                }
                Ok(Message::Binary(_)) => {
                    debug!(mode = M::NAME, conn_id = %conn_id, "Ignoring binary frame");
                }
                Ok(Message::Close(_)) => {
                    debug!(mode = M::NAME, conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    metrics.transport_error();
                    warn!(mode = M::NAME, conn_id = %conn_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    };

    let send = async {
        let Ok(Attachment {
            outbound,
            mut subscription,
        }) = attach_rx.await
        else {
            // Never attached; only the receive side can end the connection.
            std::future::pending::<()>().await;
            return;
        };
        debug!(mode = M::NAME, conn_id = %conn_id, scope = subscription.key(), "Send pipeline attached");

        loop {
            match subscription.recv().await {
                Recv::Message(delivery) => {
                    if !mode.admits(&outbound, &delivery) {
                        continue;
                    }
                    let json = match mode.encode(&delivery) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        metrics.transport_error();
                        warn!(mode = M::NAME, conn_id = %conn_id, "WebSocket send error: {}", e);
                        break;
                    }
                    metrics.message_delivered();
                }
                Recv::Lagged(n) => {
                    metrics.messages_dropped(n);
                    warn!(
                        mode = M::NAME,
                        conn_id = %conn_id,
                        scope = subscription.key(),
                        "Subscriber lagged, {} messages dropped", n
                    );
                }
                Recv::Closed => break,
            }
        }
    };

    tokio::select! {
        _ = receive => debug!(mode = M::NAME, conn_id = %conn_id, "Receive pipeline ended"),
        _ = send => debug!(mode = M::NAME, conn_id = %conn_id, "Send pipeline ended"),
    }

    let scope = conn
        .scope
        .binding()
        .map(|b| b.scope_key.clone())
        .unwrap_or_else(|| "-".to_string());
    metrics.connection_closed();
    info!(mode = M::NAME, conn_id = %conn_id, scope = %scope, "WebSocket connection closed");
}
