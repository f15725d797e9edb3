//! The telemetry broadcaster.
//!
//! One TCP listener serves both WebSocket upgrades and the small HTTP surface
//! (health, metrics, static files). Each accepted WebSocket runs in its own
//! task; a single sweep task pings and evicts connections.
mod connection;
mod http;
pub mod liveness;
pub mod payload;
mod pusher;
pub mod registry;
pub mod router;
mod state;
mod stream;
pub mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::{AppError, AppResult, ServerError};
use crate::metrics::ServerMetrics;
use crate::shutdown::ShutdownReceiver;

pub use state::ServerSettings;
use state::Shared;
use stream::PrefixedStream;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound or the metrics
    /// histogram cannot be allocated.
    pub async fn bind(addr: &str, settings: ServerSettings) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            AppError::server(ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })
        })?;
        let metrics =
            ServerMetrics::new().map_err(|message| AppError::server(ServerError::Histogram { message }))?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared::new(settings, metrics)),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|source| AppError::server(ServerError::LocalAddr { source }))
    }

    /// Accepts connections until shutdown is broadcast. The sweep stops with
    /// the listener and open connections are asked to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep task cannot be joined.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) -> AppResult<()> {
        let Self { listener, shared } = self;
        let sweep = tokio::spawn(sweep::run(Arc::clone(&shared), shutdown_rx.resubscribe()));
        let permits = Arc::new(Semaphore::new(shared.settings.max_connections));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                            tracing::warn!("Connection limit reached, rejecting {}", peer);
                            drop(socket);
                            continue;
                        };
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(err) = handle_socket(shared, socket, peer).await {
                                tracing::debug!("Connection from {} ended with error: {}", peer, err);
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!("Failed to accept connection: {}", err);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        drop(listener);
        sweep.await?;
        let closed = shared.close_all();
        tracing::info!("Server stopped, closed {} open connection(s)", closed);
        Ok(())
    }
}

async fn handle_socket(shared: Arc<Shared>, mut socket: TcpStream, peer: SocketAddr) -> AppResult<()> {
    let (request, head) = match http::read_request_head(&mut socket).await {
        Ok(parsed) => parsed,
        Err(err) => {
            http::reject(&shared, &mut socket, &err).await?;
            return Err(AppError::server(ServerError::BadRequest {
                peer,
                reason: err.message,
            }));
        }
    };

    if request.is_websocket_upgrade() {
        let websocket = tokio_tungstenite::accept_async(PrefixedStream::new(head, socket))
            .await
            .map_err(|source| AppError::server(ServerError::Handshake { peer, source }))?;
        connection::serve(shared, websocket, peer).await;
        Ok(())
    } else {
        http::respond(&shared, &mut socket, &request, peer).await
    }
}
