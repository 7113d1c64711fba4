//! Topic
//!
//! In-memory broadcast channel for one scope key. Publishing never blocks:
//! every subscriber reads from a bounded ring of `capacity` items, and a
//! subscriber that falls further behind loses the oldest items (reported as
//! [`Recv::Lagged`]).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::registry::TopicRegistry;

/// Broadcast channel for a single scope key.
pub struct Topic<T> {
    key: Arc<str>,
    tx: broadcast::Sender<T>,
    generation: u64,
    created_at: DateTime<Utc>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tx: self.tx.clone(),
            generation: self.generation,
            created_at: self.created_at,
        }
    }
}

impl<T> Topic<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Distinguishes successive topics created for the same key.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Topic<T> {
    pub fn new(key: &str, capacity: usize, generation: u64) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            key: Arc::from(key),
            tx,
            generation,
            created_at: Utc::now(),
        }
    }

    /// Deliver `item` to every subscriber registered right now.
    /// Returns how many subscribers it reached (0 when nobody is listening).
    pub fn publish(&self, item: T) -> usize {
        self.tx.send(item).unwrap_or(0)
    }

    /// Subscribe to a topic that is not owned by a registry (the process-wide
    /// global topic). Dropping the subscription just detaches it.
    pub(super) fn subscribe_detached(&self) -> Subscription<T> {
        Subscription {
            key: self.key.clone(),
            generation: self.generation,
            rx: Some(self.tx.subscribe()),
            registry: None,
        }
    }

    /// Subscribe on behalf of `registry`. Must be called while the registry
    /// holds the key's lock, so a concurrent teardown cannot slip in between.
    pub(super) fn subscribe_registered(&self, registry: TopicRegistry<T>) -> Subscription<T> {
        Subscription {
            key: self.key.clone(),
            generation: self.generation,
            rx: Some(self.tx.subscribe()),
            registry: Some(registry),
        }
    }
}

/// Outcome of waiting on a subscription.
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Message(T),
    /// This subscriber fell behind and `n` items were discarded for it.
    Lagged(u64),
    /// The topic is gone or the subscription was detached.
    Closed,
}

/// A live membership in a topic.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) detaches the
/// receiver and, for registry-owned topics, asks the registry to reclaim the
/// topic if this was its last subscriber. That happens exactly once.
pub struct Subscription<T> {
    key: Arc<str>,
    generation: u64,
    rx: Option<broadcast::Receiver<T>>,
    registry: Option<TopicRegistry<T>>,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T: Clone> Subscription<T> {
    pub async fn recv(&mut self) -> Recv<T> {
        let Some(rx) = self.rx.as_mut() else {
            return Recv::Closed;
        };
        match rx.recv().await {
            Ok(item) => Recv::Message(item),
            Err(broadcast::error::RecvError::Lagged(n)) => Recv::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => Recv::Closed,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // The receiver must be gone before the idle check runs.
        drop(self.rx.take());
        if let Some(registry) = self.registry.take() {
            registry.release_if_idle(&self.key);
        }
    }
}
