//! Server metrics for observability
//!
//! Provides runtime counters for the chat channels and the history endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open chat channels
    pub active_connections: AtomicU64,
    /// Total channels opened since server start
    pub total_connections: AtomicU64,
    /// Channels closed because the same user connected again
    pub superseded_connections: AtomicU64,

    // Message metrics
    /// Text frames received from clients
    pub frames_received: AtomicU64,
    /// Messages written to the store
    pub messages_persisted: AtomicU64,
    /// Forwards queued on a live receiver channel
    pub messages_delivered: AtomicU64,
    /// Forwards skipped because the receiver had no channel
    pub messages_offline: AtomicU64,
    /// Forwards that failed on a dead or saturated channel
    pub messages_failed: AtomicU64,

    // Error metrics
    /// Frames that did not parse as an envelope
    pub malformed_frames: AtomicU64,
    /// Store writes that failed
    pub persistence_errors: AtomicU64,

    /// History queries served
    pub history_queries: AtomicU64,

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

    pub fn connection_superseded(&self) {
        self.superseded_connections.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_offline(&self) {
        self.messages_offline.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_query(&self) {
        self.history_queries.fetch_add(1, Ordering::Relaxed);
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
                superseded: self.superseded_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                persisted: self.messages_persisted.load(Ordering::Relaxed),
                delivered: self.messages_delivered.load(Ordering::Relaxed),
                offline: self.messages_offline.load(Ordering::Relaxed),
                failed: self.messages_failed.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
                persistence: self.persistence_errors.load(Ordering::Relaxed),
            },
            history_queries: self.history_queries.load(Ordering::Relaxed),
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
    pub history_queries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub superseded: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub persisted: u64,
    pub delivered: u64,
    pub offline: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub malformed_frames: u64,
    pub persistence: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub online_users: u64,
    pub uptime_secs: u64,
}
