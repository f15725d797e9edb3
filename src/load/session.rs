//! Network side of one client slot.
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::client::{Backoff, ClientState};
use super::stats::LoadStats;
use crate::error::LoadError;
use crate::server::payload::MetricsPush;
use crate::shutdown::ShutdownReceiver;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings every slot shares.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub(crate) url: Url,
    pub(crate) ramp_up: Duration,
    pub(crate) backoff: Backoff,
    pub(crate) connect_timeout: Duration,
    pub(crate) close_timeout: Duration,
    pub(crate) sample_every: u64,
}

enum SessionEnd {
    Closed,
    Failed(LoadError),
    Stopped,
}

/// Runs one slot from its ramp-up start until stop is broadcast.
pub(crate) async fn run_slot(
    slot: usize,
    config: Arc<SessionConfig>,
    stats: Arc<LoadStats>,
    mut stop_rx: ShutdownReceiver,
) {
    let mut client = ClientState::new(slot, config.backoff);
    let start_delay = config
        .ramp_up
        .saturating_mul(u32::try_from(slot).unwrap_or(u32::MAX));
    tokio::select! {
        _ = stop_rx.recv() => return,
        () = tokio::time::sleep(start_delay) => {}
    }

    loop {
        let started = Instant::now();
        let attempt = tokio::select! {
            _ = stop_rx.recv() => {
                client.on_stop();
                return;
            }
            attempt = connect(&config) => attempt,
        };

        let delay = match attempt {
            Ok(socket) => {
                stats.record_connect(started.elapsed());
                client.on_open(&stats);
                tracing::debug!("Client {} connected", slot);
                match drive(socket, &mut client, &config, &stats, &mut stop_rx).await {
                    SessionEnd::Closed => {
                        tracing::debug!("Client {} closed", slot);
                        client.on_closed(&stats)
                    }
                    SessionEnd::Failed(err) => {
                        tracing::warn!("Client {} error: {}", slot, err);
                        client.on_error(&stats)
                    }
                    SessionEnd::Stopped => return,
                }
            }
            Err(err) => {
                tracing::warn!("Client {} error: {}", slot, err);
                client.on_error(&stats)
            }
        };

        let Some(delay) = delay else {
            return;
        };
        tokio::select! {
            _ = stop_rx.recv() => {
                client.on_stop();
                return;
            }
            () = tokio::time::sleep(delay) => client.on_reconnect(),
        }
    }
}

async fn connect(config: &SessionConfig) -> Result<Socket, LoadError> {
    let url = config.url.as_str();
    match tokio::time::timeout(config.connect_timeout, connect_async(url)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(source)) => Err(LoadError::Connect {
            url: url.to_owned(),
            source,
        }),
        Err(_) => Err(LoadError::ConnectTimeout {
            url: url.to_owned(),
            timeout_ms: config.connect_timeout.as_millis(),
        }),
    }
}

async fn drive(
    mut socket: Socket,
    client: &mut ClientState,
    config: &SessionConfig,
    stats: &LoadStats,
    stop_rx: &mut ShutdownReceiver,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                client.on_stop();
                close_gracefully(&mut socket, config.close_timeout).await;
                client.on_closed(stats);
                return SessionEnd::Stopped;
            }
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let total = stats.message_received();
                    if total.checked_rem(config.sample_every) == Some(0) {
                        log_sample(client.slot(), total, &text);
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    stats.message_received();
                }
                Some(Ok(Message::Close(_))) => {
                    client.on_closing();
                    close_gracefully(&mut socket, config.close_timeout).await;
                    return SessionEnd::Closed;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                None => return SessionEnd::Closed,
                Some(Err(source)) => return SessionEnd::Failed(LoadError::Transport { source }),
            },
        }
    }
}

/// Sends a close frame when needed and waits for the stream to end.
async fn close_gracefully(socket: &mut Socket, timeout: Duration) {
    let finished = tokio::time::timeout(timeout, async {
        if let Err(err) = socket.close(None).await {
            tracing::debug!("Close handshake failed: {}", err);
            return;
        }
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;
    if finished.is_err() {
        tracing::debug!("Close handshake timed out");
    }
}

fn log_sample(slot: usize, total: u64, text: &str) {
    match serde_json::from_str::<MetricsPush>(text) {
        Ok(push) => {
            let [load1, _, _] = push.cpu;
            tracing::info!(
                "Sample #{} from client {}: cpu {:.2}, memory {}%",
                total,
                slot,
                load1,
                push.memory.usage
            );
        }
        Err(_) => tracing::info!("Sample #{} from client {}: {}", total, slot, text),
    }
}
