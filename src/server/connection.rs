//! Task owning one WebSocket connection.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::payload::ServerMessage;
use super::registry::Outbound;
use super::state::Shared;
use super::{pusher, router};
use crate::metrics::MessageKind;

/// How long a graceful close waits for the peer's close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    ServerClosed,
    Terminated,
    TransportError,
}

/// Admits the connection, runs it to completion, then removes it.
pub(super) async fn serve<S>(shared: Arc<Shared>, socket: WebSocketStream<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (id, client_count) = shared.admit(peer, outbound_tx, Instant::now());
    tracing::info!("Client {} connected from {} ({} open)", id, peer, client_count);

    if let Err(err) = shared.send_json(id, &ServerMessage::welcome(client_count), MessageKind::Sent) {
        tracing::warn!("Failed to encode welcome for {}: {}", id, err);
    }
    let pusher = tokio::spawn(pusher::run(Arc::clone(&shared), id));
    shared.registry.attach_pusher(id, pusher.abort_handle());

    let (mut sink, mut stream) = socket.split();
    let exit = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => router::route(&shared, id, &text),
                Some(Ok(Message::Binary(bytes))) => {
                    router::route(&shared, id, &String::from_utf8_lossy(&bytes));
                }
                Some(Ok(Message::Pong(_))) => shared.registry.acknowledge(id, Instant::now()),
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    // The close reply is queued by the protocol and only leaves on a flush.
                    if let Err(err) = sink.flush().await {
                        tracing::debug!("Close reply to {} not delivered: {}", id, err);
                    }
                    break Exit::PeerClosed;
                }
                None => break Exit::PeerClosed,
                Some(Err(err)) => {
                    tracing::warn!("WebSocket error for {} ({}): {}", id, peer, err);
                    break Exit::TransportError;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Message(message)) => {
                    if let Err(err) = sink.send(message).await {
                        tracing::debug!("Send to {} failed: {}", id, err);
                        break Exit::TransportError;
                    }
                }
                Some(Outbound::Close) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_ok() {
                        drain_until_closed(&mut stream).await;
                    }
                    break Exit::ServerClosed;
                }
                Some(Outbound::Terminate) | None => break Exit::Terminated,
            },
        }
    };

    shared.release(id);
    match exit {
        Exit::TransportError => {
            tracing::info!("Client {} from {} dropped after an error", id, peer);
        }
        Exit::PeerClosed | Exit::ServerClosed | Exit::Terminated => {
            tracing::info!("Client {} disconnected from {} ({:?})", id, peer, exit);
        }
    }
}

async fn drain_until_closed<St>(stream: &mut St)
where
    St: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(message)) = stream.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!("Peer did not answer the close handshake in time");
    }
}
