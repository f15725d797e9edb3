use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use super::registry::{ConnectionId, Outbound, OutboundSender, Registry};
use crate::args::ServeArgs;
use crate::metrics::{MessageKind, ServerMetrics};

const CREATE_OPERATION: &str = "create";

/// Runtime knobs of the broadcaster, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub push_interval: Duration,
    pub sweep_interval: Duration,
    pub idle_timeout: Duration,
    pub create_delay: Duration,
    pub operation_delay: Duration,
    pub static_dir: PathBuf,
    pub max_connections: usize,
}

impl ServerSettings {
    /// Simulated processing time of an operation.
    #[must_use]
    pub fn delay_for(&self, operation: &str) -> Duration {
        if operation == CREATE_OPERATION {
            self.create_delay
        } else {
            self.operation_delay
        }
    }
}

impl From<&ServeArgs> for ServerSettings {
    fn from(args: &ServeArgs) -> Self {
        Self {
            push_interval: args.push_interval,
            sweep_interval: args.sweep_interval,
            idle_timeout: args.idle_timeout,
            create_delay: args.create_delay,
            operation_delay: args.operation_delay,
            static_dir: args.static_dir.clone(),
            max_connections: args.max_connections.get(),
        }
    }
}

/// State shared by the accept loop, connection tasks, pushers and the sweep.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) metrics: ServerMetrics,
    pub(crate) settings: ServerSettings,
}

impl Shared {
    pub(crate) fn new(settings: ServerSettings, metrics: ServerMetrics) -> Self {
        Self {
            registry: Registry::new(),
            metrics,
            settings,
        }
    }

    /// Registers a connection and updates the gauge.
    pub(crate) fn admit(
        &self,
        peer: SocketAddr,
        outbound: OutboundSender,
        now: Instant,
    ) -> (ConnectionId, usize) {
        self.registry.insert(peer, outbound, now, |count| {
            self.metrics.set_active_connections(count);
        })
    }

    /// Removes a connection. Only the first call for an id touches the gauge.
    pub(crate) fn release(&self, id: ConnectionId) -> bool {
        self.registry
            .remove(id, |remaining| {
                self.metrics.set_active_connections(remaining);
            })
            .is_some()
    }

    /// Serializes `payload` and queues it as a text frame, counting it under
    /// `kind` when the connection is still open.
    pub(crate) fn send_json<T: Serialize>(
        &self,
        id: ConnectionId,
        payload: &T,
        kind: MessageKind,
    ) -> Result<bool, serde_json::Error> {
        let text = serde_json::to_string(payload)?;
        let delivered = self
            .registry
            .send(id, Outbound::Message(Message::Text(text)));
        if delivered {
            self.metrics.inc_message(kind);
        }
        Ok(delivered)
    }

    /// Asks every open connection to close. Used on shutdown.
    pub(crate) fn close_all(&self) -> usize {
        let ids = self.registry.ids();
        let mut closed = 0_usize;
        for id in ids {
            self.registry.send(id, Outbound::Close);
            if self.release(id) {
                closed = closed.saturating_add(1);
            }
        }
        closed
    }
}

#[cfg(test)]
pub(crate) fn test_shared(
    idle_timeout: Duration,
) -> Result<std::sync::Arc<Shared>, crate::error::AppError> {
    let settings = ServerSettings {
        push_interval: Duration::from_millis(50),
        sweep_interval: Duration::from_secs(30),
        idle_timeout,
        create_delay: Duration::from_millis(80),
        operation_delay: Duration::from_millis(30),
        static_dir: PathBuf::from("public"),
        max_connections: 16,
    };
    let metrics = ServerMetrics::new().map_err(crate::error::AppError::validation)?;
    Ok(std::sync::Arc::new(Shared::new(settings, metrics)))
}
