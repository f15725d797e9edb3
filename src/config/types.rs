use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::args::parsers::parse_duration_with_default_unit;
use crate::error::ValidationError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub push_interval: Option<DurationValue>,
    pub sweep_interval: Option<DurationValue>,
    pub idle_timeout: Option<DurationValue>,
    pub create_delay: Option<DurationValue>,
    pub operation_delay: Option<DurationValue>,
    pub static_dir: Option<PathBuf>,
    pub max_connections: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub url: Option<String>,
    pub connections: Option<usize>,
    pub ramp_up: Option<DurationValue>,
    pub duration: Option<DurationValue>,
    pub close_backoff: Option<DurationValue>,
    pub error_backoff: Option<DurationValue>,
    pub connect_timeout: Option<DurationValue>,
    pub sample_every: Option<u64>,
    pub grace: Option<DurationValue>,
}

/// A duration written either as a number of milliseconds or as text (`"30s"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Millis(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Millis(0) => Err(ValidationError::DurationZero),
            DurationValue::Millis(ms) => Ok(Duration::from_millis(*ms)),
            DurationValue::Text(text) => parse_duration_with_default_unit(text, "ms"),
        }
    }
}
