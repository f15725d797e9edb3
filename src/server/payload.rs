//! JSON bodies exchanged over the socket.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::system::host::HostSnapshot;

pub const WELCOME_MESSAGE: &str = "Connected to WebSocket server";
pub const IDLE_MESSAGE: &str = "Closing due to inactivity";
pub const ERROR_MESSAGE: &str = "Error processing your message";
pub const COMPLETED: &str = "completed";

/// Typed server replies, tagged by their `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        message: String,
        client_count: usize,
        timestamp: i64,
    },
    Echo {
        original_message: Value,
        timestamp: i64,
    },
    OperationResponse {
        operation: String,
        status: String,
        timestamp: i64,
    },
    System {
        message: String,
        timestamp: i64,
    },
    Error {
        message: String,
        error: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn welcome(client_count: usize) -> Self {
        Self::Welcome {
            message: WELCOME_MESSAGE.to_owned(),
            client_count,
            timestamp: epoch_millis(),
        }
    }

    #[must_use]
    pub fn echo(original_message: Value) -> Self {
        Self::Echo {
            original_message,
            timestamp: epoch_millis(),
        }
    }

    #[must_use]
    pub fn operation_completed(operation: &str) -> Self {
        Self::OperationResponse {
            operation: operation.to_owned(),
            status: COMPLETED.to_owned(),
            timestamp: epoch_millis(),
        }
    }

    #[must_use]
    pub fn idle_notice() -> Self {
        Self::System {
            message: IDLE_MESSAGE.to_owned(),
            timestamp: epoch_millis(),
        }
    }

    #[must_use]
    pub fn error(error: impl ToString) -> Self {
        Self::Error {
            message: ERROR_MESSAGE.to_owned(),
            error: error.to_string(),
        }
    }
}

/// Periodic host metrics push. Carries no `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPush {
    pub timestamp: String,
    pub cpu: [f64; 3],
    pub memory: MemoryReport,
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub total: u64,
    pub free: u64,
    /// Percentage in use, two decimals.
    pub usage: String,
}

impl MetricsPush {
    #[must_use]
    pub fn from_snapshot(snapshot: &HostSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            cpu: snapshot.load_average,
            memory: MemoryReport {
                total: snapshot.total_memory,
                free: snapshot.free_memory,
                usage: snapshot.memory_usage_label(),
            },
            uptime: snapshot.uptime_secs,
        }
    }
}

#[must_use]
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}
