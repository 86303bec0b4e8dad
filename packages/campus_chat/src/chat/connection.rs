//! Per-connection chat loop
//!
//! Each channel runs as one reader loop plus one writer task. Inbound frames
//! are persisted and then forwarded to the receiver's channel; the writer
//! drains this connection's outbound queue onto the socket.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;

use super::protocol::{CloseReason, FrameError, close_frame_for, parse_envelope};
use super::registry::Delivery;
use super::{ChannelHandle, ConnectionRegistry};

/// Shared collaborators of every chat connection.
#[derive(Clone)]
pub struct ChatContext {
    pub repository: Arc<ChatRepository>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<ServerMetrics>,
    pub send_queue_capacity: usize,
}

/// Run a chat channel for `user_id` until it closes.
pub async fn handle_chat_socket(socket: WebSocket, user_id: String, ctx: ChatContext) {
    let connection_id = Uuid::new_v4();
    let span = tracing::info_span!("chat", user_id = %user_id, connection_id = %connection_id);
    run_connection(socket, user_id, connection_id, ctx)
        .instrument(span)
        .await
}

async fn run_connection(
    socket: WebSocket,
    user_id: String,
    connection_id: Uuid,
    ctx: ChatContext,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Utf8Bytes>(ctx.send_queue_capacity);
    let cancel = CancellationToken::new();

    let replaced = ctx
        .registry
        .connect(
            &user_id,
            ChannelHandle {
                connection_id,
                outbound: tx,
                cancel: cancel.clone(),
            },
        )
        .await;
    if replaced {
        ctx.metrics.connection_superseded();
    }
    ctx.metrics.connection_opened();
    info!("Chat channel open");

    let (close_tx, close_rx) = oneshot::channel::<Option<CloseFrame>>();
    let writer = tokio::spawn(
        write_outbound(ws_sender, rx, close_rx, cancel.clone()).in_current_span(),
    );

    let reason = read_inbound(&mut ws_receiver, &ctx, &cancel).await;

    let was_registered = ctx.registry.disconnect(&user_id, connection_id).await;
    let _ = close_tx.send(close_frame_for(reason, was_registered));
    if let Err(e) = writer.await {
        error!("Chat writer task failed: {}", e);
    }

    ctx.metrics.connection_closed();
    info!(?reason, "Chat channel closed");
}

/// Read frames until the connection leaves the `Open` state.
async fn read_inbound(
    ws_receiver: &mut SplitStream<WebSocket>,
    ctx: &ChatContext,
    cancel: &CancellationToken,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Cancelled,
            frame = ws_receiver.next() => frame,
        };

        let text = match frame {
            None | Some(Ok(Message::Close(_))) => return CloseReason::PeerClosed,
            Some(Err(e)) => {
                debug!("Chat transport error: {}", e);
                return CloseReason::TransportError;
            }
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                warn!("{}", FrameError::Binary);
                ctx.metrics.malformed_frame();
                return CloseReason::ProtocolFault;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        };

        // Not raced against cancellation: a received frame is always persisted.
        if let Err(e) = relay_frame(ctx, text).await {
            warn!("Closing chat channel: {}", e);
            ctx.metrics.malformed_frame();
            return CloseReason::ProtocolFault;
        }
    }
}

/// Persist one inbound frame, then forward it verbatim to its receiver.
///
/// Returns `Ok(None)` when the store rejected the write; such a frame is not
/// forwarded and the sender's connection stays open.
pub(crate) async fn relay_frame(
    ctx: &ChatContext,
    text: Utf8Bytes,
) -> Result<Option<Delivery>, FrameError> {
    let received_at = Utc::now();
    ctx.metrics.frame_received();
    let envelope = parse_envelope(text.as_str())?;

    let stored = match ctx
        .repository
        .insert_chat_message(
            &envelope.sender,
            &envelope.receiver,
            &envelope.message,
            received_at,
        )
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            error!(
                receiver = %envelope.receiver,
                "Failed to persist chat message, not forwarding: {:#}", e
            );
            ctx.metrics.persistence_error();
            return Ok(None);
        }
    };
    ctx.metrics.message_persisted();

    let delivery = ctx.registry.send_to(&envelope.receiver, text).await;
    match delivery {
        Delivery::Delivered => ctx.metrics.message_delivered(),
        Delivery::Offline => ctx.metrics.message_offline(),
        Delivery::Failed => ctx.metrics.message_failed(),
    }
    debug!(
        message_id = %stored.id,
        receiver = %envelope.receiver,
        ?delivery,
        "Relayed chat message"
    );

    Ok(Some(delivery))
}

/// Drain the outbound queue onto the socket until told to close.
async fn write_outbound(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Utf8Bytes>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            frame = &mut close_rx => {
                if let Ok(Some(frame)) = frame {
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                }
                return;
            }
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        debug!("Chat write failed: {}", e);
                        cancel.cancel();
                        return;
                    }
                }
                // Registry let go of us; wait for the reader's verdict
                None => {
                    if let Ok(Some(frame)) = (&mut close_rx).await {
                        let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    }
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryPage;
    use crate::repository::test_helpers::test_repository;

    async fn test_context() -> ChatContext {
        ChatContext {
            repository: Arc::new(test_repository().await),
            registry: Arc::new(ConnectionRegistry::new()),
            metrics: Arc::new(ServerMetrics::new()),
            send_queue_capacity: 8,
        }
    }

    async fn register(ctx: &ChatContext, user: &str) -> mpsc::Receiver<Utf8Bytes> {
        let (tx, rx) = mpsc::channel(8);
        ctx.registry
            .connect(
                user,
                ChannelHandle {
                    connection_id: Uuid::new_v4(),
                    outbound: tx,
                    cancel: CancellationToken::new(),
                },
            )
            .await;
        rx
    }

    const FRAME: &str = r#"{"sender":"A","receiver":"B","message":"hi"}"#;

    #[tokio::test]
    async fn relays_to_live_receiver_verbatim() {
        let ctx = test_context().await;
        let mut b_rx = register(&ctx, "B").await;

        let delivery = relay_frame(&ctx, Utf8Bytes::from(FRAME)).await.unwrap();
        assert_eq!(delivery, Some(Delivery::Delivered));

        let forwarded = b_rx.recv().await.unwrap();
        assert_eq!(forwarded.as_str(), FRAME);

        // Already durable by the time the receiver sees it
        let history = ctx
            .repository
            .history("A", "B", HistoryPage::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "hi");
        assert_eq!(ctx.metrics.snapshot().messages.delivered, 1);
    }

    #[tokio::test]
    async fn offline_receiver_still_persists() {
        let ctx = test_context().await;
        let before = Utc::now();

        let delivery = relay_frame(
            &ctx,
            Utf8Bytes::from(r#"{"sender":"A","receiver":"C","message":"later"}"#),
        )
        .await
        .unwrap();
        assert_eq!(delivery, Some(Delivery::Offline));

        let history = ctx
            .repository
            .history("C", "A", HistoryPage::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].timestamp >= before);
        assert_eq!(ctx.metrics.snapshot().messages.offline, 1);
    }

    #[tokio::test]
    async fn forwards_original_text_including_extra_fields() {
        let ctx = test_context().await;
        let mut b_rx = register(&ctx, "B").await;
        let frame = r#"{"message":"hi","receiver":"B","sender":"A","client_ts":123}"#;

        relay_frame(&ctx, Utf8Bytes::from(frame)).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().as_str(), frame);
    }

    #[tokio::test]
    async fn malformed_frame_stores_nothing() {
        let ctx = test_context().await;
        let mut b_rx = register(&ctx, "B").await;

        let err = relay_frame(&ctx, Utf8Bytes::from(r#"{"sender":"A","receiver":"B"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));

        assert!(b_rx.try_recv().is_err());
        let history = ctx
            .repository
            .history("A", "B", HistoryPage::default())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_skips_forwarding() {
        let ctx = test_context().await;
        let mut b_rx = register(&ctx, "B").await;
        ctx.repository.pool.close().await;

        let delivery = relay_frame(&ctx, Utf8Bytes::from(FRAME)).await.unwrap();
        assert_eq!(delivery, None);
        assert!(b_rx.try_recv().is_err());

        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.errors.persistence, 1);
        assert_eq!(snapshot.messages.persisted, 0);
    }
}
