use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::histogram::LatencyHistogram;
use crate::system::process::ProcessClock;

/// Upper bound of one router latency bucket: its `le` label in seconds and the
/// same bound in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyBucket {
    pub label: &'static str,
    pub micros: u64,
}

pub const LATENCY_BUCKETS: [LatencyBucket; 7] = [
    LatencyBucket { label: "0.001", micros: 1_000 },
    LatencyBucket { label: "0.005", micros: 5_000 },
    LatencyBucket { label: "0.01", micros: 10_000 },
    LatencyBucket { label: "0.05", micros: 50_000 },
    LatencyBucket { label: "0.1", micros: 100_000 },
    LatencyBucket { label: "0.5", micros: 500_000 },
    LatencyBucket { label: "1", micros: 1_000_000 },
];

/// Direction/type label of `websocket_messages_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKind {
    Received,
    Sent,
    Error,
    System,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Received,
        MessageKind::Sent,
        MessageKind::Error,
        MessageKind::System,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Received => "received",
            MessageKind::Sent => "sent",
            MessageKind::Error => "error",
            MessageKind::System => "system",
        }
    }

    const fn index(self) -> usize {
        match self {
            MessageKind::Received => 0,
            MessageKind::Sent => 1,
            MessageKind::Error => 2,
            MessageKind::System => 3,
        }
    }
}

/// Lifecycle label of `container_operations_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationStatus {
    Initiated,
    Completed,
    /// Finished through the HTTP container API.
    Success,
}

impl OperationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Initiated => "initiated",
            OperationStatus::Completed => "completed",
            OperationStatus::Success => "success",
        }
    }
}

#[derive(Debug)]
struct LatencyState {
    hist: LatencyHistogram,
    sum: Duration,
}

/// Process-wide instruments shared by every connection handler.
///
/// Counters are atomics; labelled families and the histogram sit behind mutexes
/// because the runtime is multi-threaded.
#[derive(Debug)]
pub struct ServerMetrics {
    active_connections: AtomicU64,
    messages: [AtomicU64; 4],
    operations: Mutex<BTreeMap<(String, OperationStatus), u64>>,
    http_requests: Mutex<BTreeMap<(String, String, u16), u64>>,
    latency: Mutex<LatencyState>,
    clock: ProcessClock,
}

impl ServerMetrics {
    /// # Errors
    ///
    /// Returns an error if the latency histogram cannot be allocated.
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            active_connections: AtomicU64::new(0),
            messages: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            operations: Mutex::new(BTreeMap::new()),
            http_requests: Mutex::new(BTreeMap::new()),
            latency: Mutex::new(LatencyState {
                hist: LatencyHistogram::new()?,
                sum: Duration::ZERO,
            }),
            clock: ProcessClock::start(),
        })
    }

    pub fn set_active_connections(&self, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        self.active_connections.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_message(&self, kind: MessageKind) {
        if let Some(counter) = self.messages.get(kind.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn message_count(&self, kind: MessageKind) -> u64 {
        self.messages
            .get(kind.index())
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    pub fn inc_operation(&self, operation: &str, status: OperationStatus) {
        if let Ok(mut operations) = self.operations.lock() {
            let count = operations
                .entry((operation.to_owned(), status))
                .or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    #[must_use]
    pub fn operation_count(&self, operation: &str, status: OperationStatus) -> u64 {
        self.operations
            .lock()
            .ok()
            .and_then(|operations| {
                operations
                    .get(&(operation.to_owned(), status))
                    .copied()
            })
            .unwrap_or(0)
    }

    pub fn inc_http_request(&self, method: &str, route: &str, status: u16) {
        if let Ok(mut requests) = self.http_requests.lock() {
            let count = requests
                .entry((method.to_owned(), route.to_owned(), status))
                .or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    /// Records one router pass. Values are kept at microsecond resolution.
    pub fn observe_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut latency) = self.latency.lock() {
            if let Err(err) = latency.hist.record(micros) {
                tracing::debug!("Dropping latency sample: {}", err);
                return;
            }
            latency.sum = latency.sum.saturating_add(elapsed);
        }
    }

    #[must_use]
    pub fn latency_count(&self) -> u64 {
        self.latency
            .lock()
            .map(|latency| latency.hist.count())
            .unwrap_or(0)
    }

    pub(super) fn operations_snapshot(&self) -> Vec<((String, OperationStatus), u64)> {
        self.operations
            .lock()
            .map(|operations| {
                operations
                    .iter()
                    .map(|(key, value)| (key.clone(), *value))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn http_snapshot(&self) -> Vec<((String, String, u16), u64)> {
        self.http_requests
            .lock()
            .map(|requests| {
                requests
                    .iter()
                    .map(|(key, value)| (key.clone(), *value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cumulative bucket counts, total observed time, and total count.
    pub(super) fn latency_snapshot(&self) -> (Vec<(&'static str, u64)>, Duration, u64) {
        let Ok(latency) = self.latency.lock() else {
            return (Vec::new(), Duration::ZERO, 0);
        };
        let buckets = LATENCY_BUCKETS
            .iter()
            .map(|bucket| (bucket.label, latency.hist.count_at_or_below(bucket.micros)))
            .collect();
        (buckets, latency.sum, latency.hist.count())
    }

    pub(super) fn uptime(&self) -> Duration {
        self.clock.uptime()
    }
}
