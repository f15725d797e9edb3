//! Reconnect state machine of one simulated client slot.
//!
//! Transitions only touch [`LoadStats`] and return the delay to wait before
//! the next attempt; the socket itself is driven by the session loop.
use std::time::Duration;

use super::stats::LoadStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closing,
    ReconnectScheduled,
    Stopped,
}

/// Reconnect delays. The error delay is always the longer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub after_close: Duration,
    pub after_error: Duration,
}

#[derive(Debug)]
pub struct ClientState {
    slot: usize,
    phase: Phase,
    backoff: Backoff,
    stopping: bool,
}

impl ClientState {
    #[must_use]
    pub const fn new(slot: usize, backoff: Backoff) -> Self {
        Self {
            slot,
            phase: Phase::Connecting,
            backoff,
            stopping: false,
        }
    }

    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Handshake succeeded.
    pub fn on_open(&mut self, stats: &LoadStats) {
        if self.phase == Phase::Connecting {
            self.phase = Phase::Open;
            stats.connection_opened();
        }
    }

    /// Either side started a graceful close.
    pub fn on_closing(&mut self) {
        if self.phase == Phase::Open {
            self.phase = Phase::Closing;
        }
    }

    /// Graceful close finished. Returns the reconnect delay, or `None` once
    /// the run is stopping.
    pub fn on_closed(&mut self, stats: &LoadStats) -> Option<Duration> {
        if matches!(self.phase, Phase::Open | Phase::Closing) {
            stats.connection_left();
        }
        self.schedule(self.backoff.after_close)
    }

    /// Transport error while connecting or open.
    pub fn on_error(&mut self, stats: &LoadStats) -> Option<Duration> {
        if matches!(self.phase, Phase::Open | Phase::Closing) {
            stats.connection_left();
        }
        stats.connection_failed();
        self.schedule(self.backoff.after_error)
    }

    /// Reconnect delay elapsed.
    pub fn on_reconnect(&mut self) {
        if self.phase == Phase::ReconnectScheduled && !self.stopping {
            self.phase = Phase::Connecting;
        }
    }

    /// The run is over: no further reconnects. An open connection moves to
    /// `Closing` and still has to report `on_closed` or `on_error`.
    pub fn on_stop(&mut self) {
        self.stopping = true;
        match self.phase {
            Phase::Open => self.phase = Phase::Closing,
            Phase::Connecting | Phase::ReconnectScheduled => self.phase = Phase::Stopped,
            Phase::Closing | Phase::Stopped => {}
        }
    }

    fn schedule(&mut self, delay: Duration) -> Option<Duration> {
        if self.stopping {
            self.phase = Phase::Stopped;
            return None;
        }
        self.phase = Phase::ReconnectScheduled;
        Some(delay)
    }
}
