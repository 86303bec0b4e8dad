//! Connection Registry
//!
//! Maps each connected user id to the one channel currently serving it and
//! routes forwarded frames onto that channel's outbound queue.

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writable side of an open channel, as held by the registry.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    /// Distinguishes successive connections of the same user
    pub connection_id: Uuid,
    /// Outbound queue drained by the connection's writer task
    pub outbound: mpsc::Sender<Utf8Bytes>,
    /// Fired to make the owning connection shut down
    pub cancel: CancellationToken,
}

/// Outcome of a best-effort forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the receiver's live channel
    Delivered,
    /// Receiver has no channel; nothing was queued
    Offline,
    /// Receiver's channel was dead or saturated; the frame was dropped
    Failed,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<String, ChannelHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the channel for `user_id`, replacing any previous one.
    ///
    /// A replaced channel is cancelled so its connection closes instead of
    /// lingering unreachable. Returns true if a channel was replaced.
    pub async fn connect(&self, user_id: &str, handle: ChannelHandle) -> bool {
        let connection_id = handle.connection_id;
        let previous = {
            let mut channels = self.channels.write().await;
            channels.insert(user_id.to_string(), handle)
        };

        match previous {
            Some(old) => {
                old.cancel.cancel();
                info!(
                    user_id,
                    %connection_id,
                    superseded = %old.connection_id,
                    "Channel replaced by newer connection"
                );
                true
            }
            None => {
                debug!(user_id, %connection_id, "Channel registered");
                false
            }
        }
    }

    /// Remove the mapping for `user_id` if it still belongs to `connection_id`.
    ///
    /// A connection that was already superseded leaves its replacement alone.
    /// Returns true if a mapping was removed.
    pub async fn disconnect(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(user_id) {
            Some(current) if current.connection_id == connection_id => {
                channels.remove(user_id);
                debug!(user_id, %connection_id, "Channel deregistered");
                true
            }
            _ => false,
        }
    }

    /// Queue `payload` on the channel registered for `user_id`.
    ///
    /// Never blocks on a slow receiver: a full queue drops the frame, and a
    /// closed queue is handled as that channel disconnecting.
    pub async fn send_to(&self, user_id: &str, payload: Utf8Bytes) -> Delivery {
        let target = {
            let channels = self.channels.read().await;
            channels.get(user_id).cloned()
        };
        let Some(target) = target else {
            return Delivery::Offline;
        };

        match target.outbound.try_send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id,
                    connection_id = %target.connection_id,
                    "Outbound queue full, dropping forwarded frame"
                );
                Delivery::Failed
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    user_id,
                    connection_id = %target.connection_id,
                    "Channel gone, treating as disconnect"
                );
                if self.disconnect(user_id, target.connection_id).await {
                    target.cancel.cancel();
                }
                Delivery::Failed
            }
        }
    }

    /// Connection id currently registered for `user_id`.
    #[cfg(test)]
    pub async fn current_connection(&self, user_id: &str) -> Option<Uuid> {
        self.channels
            .read()
            .await
            .get(user_id)
            .map(|h| h.connection_id)
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.channels.read().await.contains_key(user_id)
    }

    /// Sorted ids of every user with an open channel.
    pub async fn connected_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.channels.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Cancel every open channel. Each connection deregisters itself as it
    /// shuts down. Returns how many channels were signalled.
    pub async fn close_all(&self) -> usize {
        let channels = self.channels.read().await;
        for handle in channels.values() {
            handle.cancel.cancel();
        }
        channels.len()
    }
}
