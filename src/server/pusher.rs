//! Per-connection host metrics push.
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval_at};

use super::payload::MetricsPush;
use super::registry::ConnectionId;
use super::state::Shared;
use crate::metrics::MessageKind;
use crate::system::host::read_host_snapshot;

/// Pushes a snapshot every `push_interval` until the connection leaves the
/// registry. Registry removal also aborts this task.
pub(super) async fn run(shared: Arc<Shared>, id: ConnectionId) {
    let period = shared.settings.push_interval;
    let now = tokio::time::Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.registry.contains(id) {
            break;
        }
        let push = MetricsPush::from_snapshot(&read_host_snapshot(), Utc::now());
        match shared.send_json(id, &push, MessageKind::Sent) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => tracing::debug!("Skipping metrics push to {}: {}", id, err),
        }
    }
    tracing::debug!("Pusher for {} stopped", id);
}
