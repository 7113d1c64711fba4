//! Topic Registry
//!
//! Maps scope keys (company codes, room ids) to live [`Topic`]s. Topics are
//! created on first reference and reclaimed once their last subscriber
//! leaves.
//!
//! Every operation that touches a key runs under that key's shard lock in the
//! `DashMap`, so "subscribe" and "remove if idle" are mutually atomic: a
//! subscriber either joins the existing topic before the idle check (which
//! then sees it and keeps the topic) or arrives after removal and gets a
//! fresh topic. Unrelated keys in other shards are never blocked.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::metrics::ServerMetrics;

use super::topic::{Subscription, Topic};

/// Point-in-time view of one topic, for the observability endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub key: String,
    pub subscribers: usize,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

struct RegistryInner<T> {
    /// Mode label used in logs ("tenant", "room").
    mode: &'static str,
    topics: DashMap<String, Topic<T>>,
    capacity: usize,
    next_generation: AtomicU64,
    metrics: Option<Arc<ServerMetrics>>,
}

/// Concurrent scope-key → topic map. Cheap to clone; clones share state.
pub struct TopicRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for TopicRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> TopicRegistry<T> {
    pub fn mode(&self) -> &'static str {
        self.inner.mode
    }

    pub fn len(&self) -> usize {
        self.inner.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.topics.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.topics.contains_key(key)
    }

    /// Remove the topic for `key` if it has no subscribers, as one atomic
    /// step. Returns true if a topic was removed.
    pub fn release_if_idle(&self, key: &str) -> bool {
        let removed = self
            .inner
            .topics
            .remove_if(key, |_, topic| topic.subscriber_count() == 0);

        match removed {
            Some((key, topic)) => {
                info!(
                    mode = self.inner.mode,
                    scope = %key,
                    generation = topic.generation(),
                    "Removed idle topic"
                );
                if let Some(ref m) = self.inner.metrics {
                    m.topic_removed();
                }
                true
            }
            None => {
                debug!(mode = self.inner.mode, scope = %key, "Topic still in use or already gone");
                false
            }
        }
    }

    /// Remove every topic that currently has no subscribers.
    ///
    /// Catches topics that were created eagerly (room CREATE) but never joined.
    pub fn sweep_idle(&self) -> usize {
        let mut removed = 0usize;
        self.inner.topics.retain(|key, topic| {
            if topic.subscriber_count() == 0 {
                debug!(mode = self.inner.mode, scope = %key, "Sweeping idle topic");
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            info!(mode = self.inner.mode, removed, "Swept idle topics");
            if let Some(ref m) = self.inner.metrics {
                for _ in 0..removed {
                    m.topic_removed();
                }
            }
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<TopicStats> {
        let mut stats: Vec<TopicStats> = self
            .inner
            .topics
            .iter()
            .map(|entry| TopicStats {
                key: entry.key().clone(),
                subscribers: entry.value().subscriber_count(),
                generation: entry.value().generation(),
                created_at: entry.value().created_at(),
            })
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

impl<T: Clone> TopicRegistry<T> {
    pub fn new(mode: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                mode,
                topics: DashMap::new(),
                capacity,
                next_generation: AtomicU64::new(1),
                metrics: None,
            }),
        }
    }

    pub fn with_metrics(mode: &'static str, capacity: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                mode,
                topics: DashMap::new(),
                capacity,
                next_generation: AtomicU64::new(1),
                metrics: Some(metrics),
            }),
        }
    }

    fn create(&self, key: &str) -> Topic<T> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        info!(mode = self.inner.mode, scope = %key, generation, "Created topic");
        if let Some(ref m) = self.inner.metrics {
            m.topic_created();
        }
        Topic::new(key, self.inner.capacity, generation)
    }

    /// Return the live topic for `key`, creating it if absent.
    pub fn get_or_create(&self, key: &str) -> Topic<T> {
        self.inner
            .topics
            .entry(key.to_string())
            .or_insert_with(|| self.create(key))
            .value()
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Topic<T>> {
        self.inner.topics.get(key).map(|topic| topic.value().clone())
    }

    /// Get-or-create the topic for `key` and register a subscriber on it,
    /// both under the key's lock.
    pub fn subscribe(&self, key: &str) -> Subscription<T> {
        let entry = self
            .inner
            .topics
            .entry(key.to_string())
            .or_insert_with(|| self.create(key));
        entry.value().subscribe_registered(self.clone())
    }

    /// Publish to the live topic for `key`, if there is one.
    ///
    /// Returns `None` when no topic exists: nobody is subscribed, so there is
    /// nobody to deliver to, and no topic is created just to hold the message.
    pub fn publish(&self, key: &str, item: T) -> Option<usize> {
        self.inner
            .topics
            .get(key)
            .map(|topic| topic.value().publish(item))
    }
}
