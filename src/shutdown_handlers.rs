use tokio::sync::broadcast;

use crate::shutdown::{ShutdownReceiver, ShutdownSender};

/// One shutdown message fans out to every subscriber.
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

#[must_use]
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<()>(SHUTDOWN_CHANNEL_CAPACITY)
}

/// Forwards Ctrl-C and SIGTERM into the shutdown channel.
///
/// The task also exits, without sending, once someone else triggers shutdown.
pub fn setup_signal_shutdown_handler(shutdown_tx: &ShutdownSender) -> tokio::task::JoinHandle<()> {
    let shutdown_tx = shutdown_tx.clone();
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            name = wait_for_signal() => {
                tracing::info!("Received {}, shutting down", name);
                drop(shutdown_tx.send(()));
            }
        }
    })
}

/// Resolves with the name of the first termination signal delivered.
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            name = ctrl_c_or_pending() => name,
            _ = term.recv() => "SIGTERM",
        },
        Err(err) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", err);
            ctrl_c_or_pending().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c_or_pending().await
}

/// A failed Ctrl-C registration must not look like a delivered signal.
async fn ctrl_c_or_pending() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}
