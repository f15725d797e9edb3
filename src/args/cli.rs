use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::defaults::{
    DEFAULT_CLOSE_BACKOFF, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONNECTIONS, DEFAULT_CREATE_DELAY,
    DEFAULT_ERROR_BACKOFF, DEFAULT_GRACE, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_OPERATION_DELAY, DEFAULT_PORT, DEFAULT_PUSH_INTERVAL,
    DEFAULT_RAMP_UP_MS, DEFAULT_RUNNING_TIME_MS, DEFAULT_SAMPLE_EVERY, DEFAULT_STATIC_DIR,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TARGET_URL,
};
use super::parsers::{
    parse_duration_arg, parse_duration_ms_arg, parse_positive_u64, parse_positive_usize,
    parse_ws_url,
};
use super::types::{PositiveU64, PositiveUsize};
use crate::error::{AppError, AppResult, ValidationError};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Real-time telemetry broadcaster over WebSockets, with a reconnecting load generator."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (sets log level to debug unless overridden by TELECAST_LOG/RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color", env = "NO_COLOR", global = true)]
    pub no_color: bool,

    /// Path to config file (TOML/JSON). Defaults to ./telecast.toml or ./telecast.json if present.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the telemetry broadcaster
    Serve(ServeArgs),
    /// Run the WebSocket load generator against a broadcaster
    Load(LoadArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(long, short = 'p', env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Interval between metric pushes on each connection (supports ms/s/m/h)
    #[arg(long = "push-interval", default_value = DEFAULT_PUSH_INTERVAL, value_parser = parse_duration_arg)]
    pub push_interval: Duration,

    /// Interval between liveness sweeps (supports ms/s/m/h)
    #[arg(long = "sweep-interval", default_value = DEFAULT_SWEEP_INTERVAL, value_parser = parse_duration_arg)]
    pub sweep_interval: Duration,

    /// Close connections that sent nothing for this long (supports ms/s/m/h)
    #[arg(long = "idle-timeout", default_value = DEFAULT_IDLE_TIMEOUT, value_parser = parse_duration_arg)]
    pub idle_timeout: Duration,

    /// Simulated processing delay for the "create" operation (supports ms/s/m/h)
    #[arg(long = "create-delay", default_value = DEFAULT_CREATE_DELAY, value_parser = parse_duration_arg)]
    pub create_delay: Duration,

    /// Simulated processing delay for every other operation (supports ms/s/m/h)
    #[arg(long = "operation-delay", default_value = DEFAULT_OPERATION_DELAY, value_parser = parse_duration_arg)]
    pub operation_delay: Duration,

    /// Directory served for plain HTTP GET requests
    #[arg(long = "static-dir", default_value = DEFAULT_STATIC_DIR)]
    pub static_dir: PathBuf,

    /// Maximum number of concurrently accepted sockets
    #[arg(long = "max-connections", default_value = DEFAULT_MAX_CONNECTIONS, value_parser = parse_positive_usize)]
    pub max_connections: PositiveUsize,
}

impl ServeArgs {
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Args, Clone)]
pub struct LoadArgs {
    /// Target WebSocket URL
    #[arg(long, short = 'u', env = "WS_URL", default_value = DEFAULT_TARGET_URL, value_parser = parse_ws_url)]
    pub url: Url,

    /// Number of concurrent simulated clients
    #[arg(long, short = 'c', env = "CONNECTIONS", default_value = DEFAULT_CONNECTIONS, value_parser = parse_positive_usize)]
    pub connections: PositiveUsize,

    /// Delay between successive client starts (bare numbers are milliseconds)
    #[arg(long = "ramp-up", env = "RAMP_UP_INTERVAL", default_value = DEFAULT_RAMP_UP_MS, value_parser = parse_duration_ms_arg)]
    pub ramp_up: Duration,

    /// Total run duration (bare numbers are milliseconds)
    #[arg(long = "duration", short = 't', env = "RUNNING_TIME", default_value = DEFAULT_RUNNING_TIME_MS, value_parser = parse_duration_ms_arg)]
    pub duration: Duration,

    /// Delay before reconnecting after a graceful close (supports ms/s/m/h)
    #[arg(long = "close-backoff", default_value = DEFAULT_CLOSE_BACKOFF, value_parser = parse_duration_arg)]
    pub close_backoff: Duration,

    /// Delay before reconnecting after a transport error (supports ms/s/m/h)
    #[arg(long = "error-backoff", default_value = DEFAULT_ERROR_BACKOFF, value_parser = parse_duration_arg)]
    pub error_backoff: Duration,

    /// Timeout for the WebSocket handshake (supports ms/s/m/h)
    #[arg(long = "connect-timeout", default_value = DEFAULT_CONNECT_TIMEOUT, value_parser = parse_duration_arg)]
    pub connect_timeout: Duration,

    /// Log one received message out of every N
    #[arg(long = "sample-every", default_value = DEFAULT_SAMPLE_EVERY, value_parser = parse_positive_u64)]
    pub sample_every: PositiveU64,

    /// Time allowed for connections to close before exiting (supports ms/s/m/h)
    #[arg(long = "grace", default_value = DEFAULT_GRACE, value_parser = parse_duration_arg)]
    pub grace: Duration,
}

impl LoadArgs {
    /// Checks constraints that span several options.
    ///
    /// # Errors
    ///
    /// Returns an error when the error backoff does not exceed the close backoff.
    pub fn validate(&self) -> AppResult<()> {
        if self.error_backoff <= self.close_backoff {
            return Err(AppError::validation(ValidationError::BackoffOrdering {
                close_ms: self.close_backoff.as_millis(),
                error_ms: self.error_backoff.as_millis(),
            }));
        }
        Ok(())
    }
}
