//! Server instruments, the histogram behind them, and their text exposition.
mod exposition;
mod histogram;
mod telemetry;


pub use exposition::{PROMETHEUS_CONTENT_TYPE, render_prometheus};
pub use histogram::LatencyHistogram;
pub use telemetry::{LATENCY_BUCKETS, LatencyBucket, MessageKind, OperationStatus, ServerMetrics};
