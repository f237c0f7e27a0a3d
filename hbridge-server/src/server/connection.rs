//! Per-connection WebSocket handling

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use hbridge_protocol::{codec, Reply, UNSUPPORTED_FRAME_REPLY};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::registry::{ConnectionRegistry, Outbound};
use crate::dispatch::MessageDispatcher;

/// Frames a connection may have queued before broadcasts to it are dropped
const OUTBOUND_CAPACITY: usize = 64;

/// Everything a connection task needs from the server
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub dispatcher: Arc<MessageDispatcher>,
    pub registry: Arc<ConnectionRegistry>,
    pub max_message_size: usize,
    pub shutdown: CancellationToken,
}

/// Serve one accepted TCP stream until the peer leaves or the server stops.
///
/// Binary frames are dispatched one at a time so replies keep request order.
pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    let config = WebSocketConfig {
        max_message_size: Some(ctx.max_message_size),
        max_frame_size: Some(ctx.max_message_size),
        ..Default::default()
    };

    let ws = match accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (mut sink, mut frames) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let id = ctx.registry.register(tx.clone(), peer);
    info!(connection = %id, %peer, "Client connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                Outbound::Binary(bytes) => sink.send(Message::Binary(bytes)).await,
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!(error = %e, "Write failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };

        let reply = match frame {
            None => break,
            Some(Err(e)) => {
                warn!(connection = %id, error = %e, "Connection error");
                break;
            }
            Some(Ok(Message::Binary(bytes))) => {
                trace!(connection = %id, len = bytes.len(), "Received message");
                dispatch(&ctx.dispatcher, bytes).await
            }
            Some(Ok(Message::Text(_))) => {
                debug!(connection = %id, "Rejected text frame");
                UNSUPPORTED_FRAME_REPLY.to_vec()
            }
            Some(Ok(Message::Close(_))) => break,
            // Ping/pong is answered by the transport
            Some(Ok(_)) => continue,
        };

        if tx.send(Outbound::Binary(reply)).await.is_err() {
            break;
        }
    }

    ctx.registry.unregister(id);
    let _ = tx.send(Outbound::Close).await;
    drop(tx);
    let _ = writer.await;
    info!(connection = %id, %peer, "Client disconnected");
}

/// Run the dispatcher off the async workers; approvals and host calls block.
async fn dispatch(dispatcher: &Arc<MessageDispatcher>, bytes: Vec<u8>) -> Vec<u8> {
    let dispatcher = Arc::clone(dispatcher);
    match tokio::task::spawn_blocking(move || dispatcher.handle_binary(&bytes)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Dispatch task failed");
            codec::encode(&Reply::failure(format!("Internal error: {}", e))).unwrap_or_default()
        }
    }
}
