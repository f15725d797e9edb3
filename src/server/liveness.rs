//! Per-connection heartbeat bookkeeping.
//!
//! Pure state and transitions; every method takes the instant it should treat
//! as "now" so sweeps can be exercised without sleeping.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessState {
    is_alive: bool,
    last_activity: Instant,
    last_ack: Instant,
}

impl LivenessState {
    /// A freshly admitted connection counts as alive and active.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            is_alive: true,
            last_activity: now,
            last_ack: now,
        }
    }

    /// Pong received. Marks the peer alive without counting as activity, so a
    /// peer that only answers pings still reaches the idle timeout.
    pub fn on_acknowledge(&mut self, now: Instant) {
        self.is_alive = true;
        self.last_ack = self.last_ack.max(now);
    }

    /// Any inbound payload.
    pub fn on_activity(&mut self, now: Instant) {
        self.last_activity = self.last_activity.max(now);
    }

    pub fn reset_for_sweep(&mut self) {
        self.is_alive = false;
    }

    /// The previous ping went unanswered.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        !self.is_alive
    }

    #[must_use]
    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle_timeout
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.is_alive
    }

    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[must_use]
    pub const fn last_ack(&self) -> Instant {
        self.last_ack
    }
}

/// `base` moved forward by `by`, saturating at `base`.
#[cfg(test)]
pub(crate) fn offset(base: Instant, by: Duration) -> Instant {
    base.checked_add(by).unwrap_or(base)
}
