//! Core library for the `telecast` binary.
//!
//! `telecast serve` runs a WebSocket telemetry broadcaster: every connection
//! receives a host metrics push once per second, client messages are echoed or
//! answered after a simulated operation delay, and idle or unresponsive peers
//! are swept out. `telecast load` is the companion load generator that keeps a
//! fixed number of reconnecting clients attached to a broadcaster.
pub mod args;
pub mod config;
pub mod error;
pub mod load;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod shutdown_handlers;
pub mod system;
