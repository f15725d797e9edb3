use std::time::Duration;

pub(crate) const DEFAULT_PORT: u16 = 8080;
pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_STATIC_DIR: &str = "public";
pub(crate) const DEFAULT_MAX_CONNECTIONS: &str = "10000";

pub(crate) const DEFAULT_PUSH_INTERVAL: &str = "1s";
pub(crate) const DEFAULT_SWEEP_INTERVAL: &str = "30s";
pub(crate) const DEFAULT_IDLE_TIMEOUT: &str = "120s";
pub(crate) const DEFAULT_CREATE_DELAY: &str = "800ms";
pub(crate) const DEFAULT_OPERATION_DELAY: &str = "300ms";

pub(crate) const DEFAULT_TARGET_URL: &str = "ws://localhost:8080";
pub(crate) const DEFAULT_CONNECTIONS: &str = "200";
pub(crate) const DEFAULT_RAMP_UP_MS: &str = "100";
pub(crate) const DEFAULT_RUNNING_TIME_MS: &str = "600000";
pub(crate) const DEFAULT_CLOSE_BACKOFF: &str = "1s";
pub(crate) const DEFAULT_ERROR_BACKOFF: &str = "5s";
pub(crate) const DEFAULT_CONNECT_TIMEOUT: &str = "10s";
pub(crate) const DEFAULT_SAMPLE_EVERY: &str = "1000";
pub(crate) const DEFAULT_GRACE: &str = "5s";

/// Interval of the load generator's `{active, messages, failed}` sampler.
pub(crate) const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
