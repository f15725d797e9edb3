//! Counters shared by every simulated client, and the once-per-second sampler.
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval_at};

use crate::metrics::LatencyHistogram;
use crate::shutdown::ShutdownReceiver;

#[derive(Debug)]
pub struct LoadStats {
    active: AtomicU64,
    peak_active: AtomicU64,
    total_messages: AtomicU64,
    failed: AtomicU64,
    connects: AtomicU64,
    connect_latency_ms: Mutex<LatencyHistogram>,
}

impl LoadStats {
    /// # Errors
    ///
    /// Returns an error if the handshake histogram cannot be allocated.
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            active: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_latency_ms: Mutex::new(LatencyHistogram::new()?),
        })
    }

    pub(crate) fn connection_opened(&self) {
        let active = self.active.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    pub(crate) fn connection_left(&self) {
        // Saturating so a stray double call cannot wrap the gauge.
        drop(
            self.active
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                    Some(value.saturating_sub(1))
                }),
        );
    }

    pub(crate) fn connection_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one received message and returns the running total.
    pub(crate) fn message_received(&self) -> u64 {
        self.total_messages
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    pub(crate) fn record_connect(&self, elapsed: Duration) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if let Ok(mut hist) = self.connect_latency_ms.lock()
            && let Err(err) = hist.record(millis)
        {
            tracing::debug!("Dropping handshake latency sample: {}", err);
        }
    }

    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_active(&self) -> u64 {
        self.peak_active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Handshake latency p50/p90/p99 in milliseconds.
    #[must_use]
    pub fn connect_percentiles(&self) -> (u64, u64, u64) {
        self.connect_latency_ms
            .lock()
            .map(|hist| hist.percentiles())
            .unwrap_or((0, 0, 0))
    }

    #[must_use]
    pub fn sample(&self, timestamp_ms: i64) -> Sample {
        Sample {
            timestamp_ms,
            active: self.active(),
            total_messages: self.total_messages(),
            failed: self.failed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub active: u64,
    pub total_messages: u64,
    pub failed: u64,
}

/// Records and logs a [`Sample`] every `period` until stop is broadcast.
pub(crate) async fn run_sampler(
    stats: std::sync::Arc<LoadStats>,
    period: Duration,
    mut stop_rx: ShutdownReceiver,
) -> Vec<Sample> {
    let mut samples = Vec::new();
    let now = tokio::time::Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                let sample = stats.sample(chrono::Utc::now().timestamp_millis());
                tracing::info!(
                    "Active: {}, Failed: {}, Messages: {}",
                    sample.active,
                    sample.failed,
                    sample.total_messages
                );
                samples.push(sample);
            }
        }
    }
    samples
}
