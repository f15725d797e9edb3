//! Periodic liveness sweep over the whole registry.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::Message;

use super::liveness::LivenessState;
use super::payload::ServerMessage;
use super::registry::{ConnectionId, Outbound};
use super::state::Shared;
use crate::metrics::MessageKind;
use crate::shutdown::ShutdownReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// No activity past the idle timeout: notice, then graceful close.
    CloseIdle,
    /// The previous ping went unanswered: drop without notice.
    Terminate,
    /// Healthy: reset and send a fresh ping.
    Ping,
}

/// The idle check wins over staleness when both hold on the same tick.
pub fn decide(state: &mut LivenessState, now: Instant, idle_timeout: Duration) -> SweepAction {
    if state.is_idle(now, idle_timeout) {
        SweepAction::CloseIdle
    } else if state.is_stale() {
        SweepAction::Terminate
    } else {
        state.reset_for_sweep();
        SweepAction::Ping
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_closed: usize,
    pub terminated: usize,
    pub pinged: usize,
}

pub(super) async fn run(shared: Arc<Shared>, mut shutdown_rx: ShutdownReceiver) {
    let period = shared.settings.sweep_interval;
    let now = tokio::time::Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let report = sweep_once(&shared, Instant::now());
                tracing::debug!(
                    "Sweep: {} pinged, {} idle closed, {} terminated",
                    report.pinged,
                    report.idle_closed,
                    report.terminated
                );
            }
        }
    }
    tracing::debug!("Sweep loop stopped");
}

pub(super) fn sweep_once(shared: &Shared, now: Instant) -> SweepReport {
    let mut report = SweepReport::default();
    for (id, action) in shared.registry.sweep(now, shared.settings.idle_timeout) {
        match action {
            SweepAction::CloseIdle => {
                tracing::info!("Closing idle connection {} ({})", id, peer_label(shared, id));
                if let Err(err) = shared.send_json(id, &ServerMessage::idle_notice(), MessageKind::System) {
                    tracing::warn!("Failed to encode idle notice for {}: {}", id, err);
                }
                shared.registry.send(id, Outbound::Close);
                shared.release(id);
                report.idle_closed = report.idle_closed.saturating_add(1);
            }
            SweepAction::Terminate => {
                tracing::info!("Terminating inactive connection {} ({})", id, peer_label(shared, id));
                shared.registry.send(id, Outbound::Terminate);
                shared.release(id);
                report.terminated = report.terminated.saturating_add(1);
            }
            SweepAction::Ping => {
                shared
                    .registry
                    .send(id, Outbound::Message(Message::Ping(Vec::new())));
                report.pinged = report.pinged.saturating_add(1);
            }
        }
    }
    report
}

fn peer_label(shared: &Shared, id: ConnectionId) -> String {
    shared
        .registry
        .peer(id)
        .map_or_else(|| "unknown peer".to_owned(), |peer| peer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::server::liveness::offset;
    use crate::server::state::test_shared;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::mpsc;

    const IDLE: Duration = Duration::from_secs(120);
    const TICK: Duration = Duration::from_secs(30);

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50_000)
    }

    #[test]
    fn healthy_connection_is_pinged_and_reset() {
        let now = Instant::now();
        let mut state = LivenessState::new(now);
        assert_eq!(decide(&mut state, offset(now, TICK), IDLE), SweepAction::Ping);
        assert!(state.is_stale());
    }

    #[test]
    fn unanswered_ping_terminates_on_next_tick() {
        let now = Instant::now();
        let mut state = LivenessState::new(now);
        state.on_activity(offset(now, TICK));
        assert_eq!(decide(&mut state, offset(now, TICK), IDLE), SweepAction::Ping);
        assert_eq!(decide(&mut state, offset(now, TICK.saturating_mul(2)), IDLE), SweepAction::Terminate);
    }

    #[test]
    fn idle_wins_over_stale() {
        let now = Instant::now();
        let mut state = LivenessState::new(now);
        state.reset_for_sweep();
        let later = offset(now, IDLE.saturating_add(Duration::from_secs(1)));
        assert_eq!(decide(&mut state, later, IDLE), SweepAction::CloseIdle);
    }

    #[test]
    fn responsive_but_idle_connection_is_closed() {
        let start = Instant::now();
        let mut state = LivenessState::new(start);
        let mut tick = start;
        let mut actions = Vec::new();
        for _ in 0..5 {
            tick = offset(tick, TICK);
            let action = decide(&mut state, tick, IDLE);
            actions.push(action);
            if action != SweepAction::Ping {
                break;
            }
            state.on_acknowledge(offset(tick, Duration::from_millis(5)));
        }
        assert_eq!(
            actions,
            vec![
                SweepAction::Ping,
                SweepAction::Ping,
                SweepAction::Ping,
                SweepAction::Ping,
                SweepAction::CloseIdle
            ]
        );
    }

    #[tokio::test]
    async fn sweep_once_notifies_idle_connection_exactly_once() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let (id, _) = shared.admit(peer(), tx, start);

        let report = sweep_once(&shared, offset(start, IDLE.saturating_add(Duration::from_secs(1))));
        assert_eq!(report.idle_closed, 1);
        assert!(!shared.registry.contains(id));
        assert_eq!(shared.metrics.active_connections(), 0);
        assert_eq!(shared.metrics.message_count(MessageKind::System), 1);

        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(Message::Text(_)))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());

        let report = sweep_once(&shared, offset(start, IDLE.saturating_mul(2)));
        assert_eq!(report, SweepReport::default());
        assert_eq!(shared.metrics.message_count(MessageKind::System), 1);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_once_terminates_silent_connection() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let (id, _) = shared.admit(peer(), tx, start);

        assert_eq!(sweep_once(&shared, offset(start, TICK)).pinged, 1);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(Message::Ping(_)))));

        assert_eq!(sweep_once(&shared, offset(start, TICK.saturating_mul(2))).terminated, 1);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Terminate)));
        assert!(!shared.registry.contains(id));
        assert_eq!(shared.metrics.message_count(MessageKind::System), 0);
        Ok(())
    }
}
