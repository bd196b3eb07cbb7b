//! Per-connection state machine and frame dispatch (`spec.md` §4.1, §4.7).
//!
//! `ACCEPTED -> HANDSHAKING -> OPEN -> CLOSING -> CLOSED`. Axum performs the
//! actual RFC 6455 handshake and frame codec; this module only owns the
//! application-level transitions and the read/write task split.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pushi_broker::Broker;
use pushi_common::model::App;
use pushi_common::{BrokerError, OutboundFrame, SocketId};
use tracing::{debug, info, warn};

use crate::limits::{new_message_rate_limiter, Limiters};

/// Whether a protocol/limit violation should also close the socket
/// (`spec.md` §4.8 — protocol breaches and size/rate violations close;
/// auth and not-found failures only emit `pusher:error`).
fn should_close(err: &BrokerError) -> bool {
    matches!(err, BrokerError::Protocol(_) | BrokerError::Limit(_))
}

fn error_frame(message: impl Into<String>) -> OutboundFrame {
    OutboundFrame::with_json(
        "pusher:error",
        None,
        &serde_json::json!({ "message": message.into() }),
    )
    .expect("error payload always serializes")
}

/// Runs one connection end to end: registers it with the broker, sends the
/// handshake frame, then drives the read loop until the socket closes.
pub async fn handle_socket(
    socket: WebSocket,
    broker: Arc<Broker>,
    limiters: Arc<Limiters>,
    app: App,
    remote: SocketAddr,
) {
    let socket_id = SocketId::new();
    info!(%socket_id, app_id = %app.id, %remote, "connection accepted");

    let rx = broker.register_connection(app.id, socket_id);
    let (mut sink, mut stream) = socket.split();

    let mut writer_rx = rx;
    let writer = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let handshake = OutboundFrame::with_json(
        "pusher:connection_established",
        None,
        &serde_json::json!({ "socket_id": socket_id.to_string() }),
    )
    .expect("handshake payload always serializes");
    broker.send_frame(socket_id, handshake).await;
    debug!(%socket_id, "handshake sent, connection open");

    let limits = broker.config().limits.clone();
    let rate_limiter = new_message_rate_limiter(&limits);

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(%socket_id, error = %e, "transport error, closing");
                break;
            }
        };

        let text = match message {
            Message::Text(t) => t,
            Message::Binary(_) => {
                broker
                    .send_frame(socket_id, error_frame("binary frames are not supported"))
                    .await;
                break;
            }
            Message::Close(_) => {
                debug!(%socket_id, "clean close received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if text.len() > limits.max_message_size {
            broker
                .send_frame(socket_id, error_frame("message exceeds max_message_size"))
                .await;
            break;
        }

        if !rate_limiter.check() {
            broker
                .send_frame(socket_id, error_frame("rate limit exceeded"))
                .await;
            break;
        }

        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                broker
                    .send_frame(socket_id, error_frame("malformed JSON frame"))
                    .await;
                break;
            }
        };

        let event = match value.get("event").and_then(|v| v.as_str()) {
            Some(e) => e,
            None => {
                broker
                    .send_frame(socket_id, error_frame("frame missing event field"))
                    .await;
                break;
            }
        };
        if event.is_empty()
            || event.len() > limits.max_event_name_length
            || !event
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-'))
        {
            broker
                .send_frame(socket_id, error_frame("invalid event name"))
                .await;
            break;
        }

        if event == "pusher:subscribe" {
            if let Some(channel) = value.get("channel").and_then(|v| v.as_str()) {
                if broker.channel_count_for_socket(app.id, socket_id) >= limits.max_channels_per_socket
                    || broker.socket_count_for_channel(app.id, channel) >= limits.max_sockets_per_channel
                {
                    broker
                        .send_frame(socket_id, error_frame("channel limit exceeded"))
                        .await;
                    continue;
                }
            }
        }

        if let Err(e) = broker.dispatch(&app, socket_id, event, value).await {
            warn!(%socket_id, event, error = %e, "dispatch failed");
            broker.send_frame(socket_id, error_frame(e.to_string())).await;
            if should_close(&e) {
                break;
            }
        }
    }

    writer.abort();
    broker.disconnect(socket_id).await;
    limiters.ip_counts.release(remote.ip());
    info!(%socket_id, app_id = %app.id, "connection closed");
}
