//! WebSocket load generator.
//!
//! One task per connection slot, started `ramp_up` apart. Each slot loops
//! through the reconnect state machine in [`client`] until the run duration
//! elapses or shutdown is signalled; then every slot closes its socket and the
//! summary is collected.
pub mod client;
mod session;
pub mod stats;
mod summary;

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use crate::args::LoadArgs;
use crate::args::defaults::SAMPLE_INTERVAL;
use crate::error::{AppError, AppResult, LoadError};
use crate::shutdown::ShutdownSender;
use crate::shutdown_handlers::shutdown_channel;

use client::Backoff;
use session::{SessionConfig, run_slot};
use stats::{LoadStats, run_sampler};

pub use summary::{LoadSummary, print_summary};

/// Runs the load test to completion and returns its summary.
///
/// # Errors
///
/// Returns an error when the arguments are inconsistent, the statistics cannot
/// be allocated, or the sampler task panics.
pub async fn run_load(args: &LoadArgs, shutdown_tx: &ShutdownSender) -> AppResult<LoadSummary> {
    args.validate()?;
    let connections = args.connections.get();
    let stats = Arc::new(
        LoadStats::new().map_err(|message| AppError::load(LoadError::Histogram { message }))?,
    );
    let config = Arc::new(SessionConfig {
        url: args.url.clone(),
        ramp_up: args.ramp_up,
        backoff: Backoff {
            after_close: args.close_backoff,
            after_error: args.error_backoff,
        },
        connect_timeout: args.connect_timeout,
        close_timeout: args.grace,
        sample_every: args.sample_every.get(),
    });

    tracing::info!(
        "Starting load test: {} connections to {}, ramp-up {}ms, duration {}ms",
        connections,
        args.url,
        args.ramp_up.as_millis(),
        args.duration.as_millis()
    );

    let (stop_tx, _) = shutdown_channel();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let started = Instant::now();

    let sampler = tokio::spawn(run_sampler(
        Arc::clone(&stats),
        SAMPLE_INTERVAL,
        stop_tx.subscribe(),
    ));
    let mut slots = JoinSet::new();
    for slot in 0..connections {
        slots.spawn(run_slot(
            slot,
            Arc::clone(&config),
            Arc::clone(&stats),
            stop_tx.subscribe(),
        ));
    }

    tokio::select! {
        () = tokio::time::sleep(args.duration) => {
            tracing::info!("Test completed. Closing connections...");
        }
        _ = shutdown_rx.recv() => {
            tracing::info!("Shutdown requested. Closing connections...");
        }
    }
    drop(stop_tx.send(()));

    let samples = sampler.await?;
    let drained = tokio::time::timeout(args.grace, async {
        while let Some(joined) = slots.join_next().await {
            if let Err(err) = joined {
                tracing::error!("Client task failed: {}", err);
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "Grace period elapsed with {} client(s) still closing",
            slots.len()
        );
        slots.abort_all();
    }

    Ok(LoadSummary::collect(
        &stats,
        samples,
        started.elapsed(),
        connections,
    ))
}
