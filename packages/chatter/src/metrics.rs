//! Server metrics for observability
//!
//! Counters for connections, the fan-out pipeline, and topic lifecycle.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Message metrics
    /// Text frames received from clients
    pub frames_received: AtomicU64,
    /// Messages handed to a topic
    pub messages_published: AtomicU64,
    /// Frames written to subscribers
    pub messages_delivered: AtomicU64,
    /// Messages a lagging subscriber never saw
    pub messages_dropped: AtomicU64,
    /// Messages stored but published to no topic
    pub delivery_gaps: AtomicU64,

    // Error metrics
    pub decode_errors: AtomicU64,
    pub validation_errors: AtomicU64,
    pub store_errors: AtomicU64,
    /// Read/write failures on a connection
    pub transport_errors: AtomicU64,

    // Topic metrics
    pub topics_created: AtomicU64,
    pub topics_removed: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_dropped(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn delivery_gap(&self) {
        self.delivery_gaps.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Topic tracking
    pub fn topic_created(&self) {
        self.topics_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn topic_removed(&self) {
        self.topics_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                published: self.messages_published.load(Ordering::Relaxed),
                delivered: self.messages_delivered.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                delivery_gaps: self.delivery_gaps.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                decode: self.decode_errors.load(Ordering::Relaxed),
                validation: self.validation_errors.load(Ordering::Relaxed),
                store: self.store_errors.load(Ordering::Relaxed),
                transport: self.transport_errors.load(Ordering::Relaxed),
            },
            topics: TopicMetrics {
                created: self.topics_created.load(Ordering::Relaxed),
                removed: self.topics_removed.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
    pub topics: TopicMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub delivery_gaps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub decode: u64,
    pub validation: u64,
    pub store: u64,
    pub transport: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetrics {
    pub created: u64,
    pub removed: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub topics: TopicHealth,
    pub connections: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicHealth {
    pub tenant: u64,
    pub room: u64,
}
