//! Inbound payload classification and dispatch.
use std::num::FpCategory;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use thiserror::Error;

use super::payload::ServerMessage;
use super::registry::ConnectionId;
use super::state::{ServerSettings, Shared};
use crate::metrics::{MessageKind, OperationStatus};

/// Failure while handling one message. Reported back to the sender, never
/// propagated past the router.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to encode response: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },
}

/// What the router decided to do with a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Echo(Value),
    Operation { name: String, delay: Duration },
}

/// Structured decode with a plain-text fallback.
#[must_use]
pub fn decode(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "text": raw }))
}

/// Picks the response strategy for a decoded payload.
///
/// Any truthy `operation` value makes the payload an operation. Strings name
/// it directly; other values are labelled by their JSON text.
#[must_use]
pub fn classify(payload: Value, settings: &ServerSettings) -> Route {
    match operation_of(&payload) {
        Some(name) => {
            let delay = settings.delay_for(&name);
            Route::Operation { name, delay }
        }
        None => Route::Echo(payload),
    }
}

fn operation_of(payload: &Value) -> Option<String> {
    let field = payload.as_object()?.get("operation")?;
    match field {
        Value::Null | Value::Bool(false) => None,
        Value::String(name) if name.is_empty() => None,
        Value::Number(number) if is_zero(number) => None,
        Value::String(name) => Some(name.clone()),
        Value::Bool(true) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            Some(field.to_string())
        }
    }
}

fn is_zero(number: &serde_json::Number) -> bool {
    number.as_u64() == Some(0)
        || number.as_i64() == Some(0)
        || number
            .as_f64()
            .is_some_and(|value| value.classify() == FpCategory::Zero)
}

/// Handles one inbound text payload for `id`.
///
/// Every outcome is settled here: echoes are queued immediately, operations
/// schedule a delayed completion, failures turn into an error payload.
pub(crate) fn route(shared: &Arc<Shared>, id: ConnectionId, raw: &str) {
    let started = Instant::now();

    let payload = decode(raw);
    shared.metrics.inc_message(MessageKind::Received);
    tracing::debug!("Received from {}: {}", id, payload);

    if let Err(err) = dispatch(shared, id, payload) {
        report_failure(shared, id, &err);
    }

    shared.registry.record_activity(id, Instant::now());
    shared.metrics.observe_latency(started.elapsed());
}

/// Logs a per-message failure and tells the sender, if it is still open.
fn report_failure(shared: &Shared, id: ConnectionId, err: &RouteError) {
    tracing::warn!("Error processing message from {}: {}", id, err);
    if let Err(encode_err) = shared.send_json(id, &ServerMessage::error(err), MessageKind::Error) {
        tracing::error!("Failed to encode error reply for {}: {}", id, encode_err);
    }
}

fn dispatch(shared: &Arc<Shared>, id: ConnectionId, payload: Value) -> Result<(), RouteError> {
    match classify(payload, &shared.settings) {
        Route::Echo(original) => {
            shared.send_json(id, &ServerMessage::echo(original), MessageKind::Sent)?;
        }
        Route::Operation { name, delay } => {
            shared
                .metrics
                .inc_operation(&name, OperationStatus::Initiated);
            schedule_completion(Arc::clone(shared), id, name, delay);
        }
    }
    Ok(())
}

/// Pending response: holds only the connection id and re-checks membership
/// when it fires.
fn schedule_completion(shared: Arc<Shared>, id: ConnectionId, operation: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let response = ServerMessage::operation_completed(&operation);
        match shared.send_json(id, &response, MessageKind::Sent) {
            Ok(true) => shared
                .metrics
                .inc_operation(&operation, OperationStatus::Completed),
            Ok(false) => {
                tracing::debug!("Connection {} closed before {} completed", id, operation);
            }
            Err(err) => {
                tracing::warn!("Failed to encode {} response for {}: {}", operation, id, err);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::server::payload::epoch_millis;
    use crate::server::registry::Outbound;
    use crate::server::state::test_shared;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    const IDLE: Duration = Duration::from_secs(120);

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 60_000)
    }

    fn reply(outbound: Option<Outbound>) -> AppResult<ServerMessage> {
        match outbound {
            Some(Outbound::Message(Message::Text(text))) => Ok(serde_json::from_str(&text)?),
            other => Err(AppError::validation(format!(
                "Expected a text reply, got {:?}",
                other
            ))),
        }
    }

    /// The completion counter moves right after the reply is queued.
    async fn completed_count(shared: &Shared, operation: &str) -> u64 {
        for _ in 0..50 {
            let count = shared
                .metrics
                .operation_count(operation, OperationStatus::Completed);
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        0
    }

    #[test]
    fn malformed_payload_becomes_text_field() {
        assert_eq!(decode("not json {"), json!({ "text": "not json {" }));
        assert_eq!(decode(r#"{"text":"hi"}"#), json!({ "text": "hi" }));
        assert_eq!(decode("42"), json!(42));
    }

    #[test]
    fn classify_routes_by_operation_field() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let settings = &shared.settings;

        assert_eq!(
            classify(json!({"operation": "create"}), settings),
            Route::Operation {
                name: "create".to_owned(),
                delay: settings.create_delay
            }
        );
        assert_eq!(
            classify(json!({"operation": "restart"}), settings),
            Route::Operation {
                name: "restart".to_owned(),
                delay: settings.operation_delay
            }
        );
        let absent_cases = [
            json!({"operation": ""}),
            json!({"operation": null}),
            json!({"operation": false}),
            json!({"operation": 0}),
            json!({"operation": 0.0}),
            json!([1, 2]),
        ];
        for absent in absent_cases {
            assert_eq!(classify(absent.clone(), settings), Route::Echo(absent));
        }
        Ok(())
    }

    #[test]
    fn truthy_non_string_operation_is_labelled_by_json_text() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let settings = &shared.settings;
        let cases = [
            (json!({"operation": 5}), "5"),
            (json!({"operation": true}), "true"),
            (json!({"operation": [1]}), "[1]"),
            (json!({"operation": {"nested": true}}), r#"{"nested":true}"#),
        ];
        for (payload, label) in cases {
            assert_eq!(
                classify(payload, settings),
                Route::Operation {
                    name: label.to_owned(),
                    delay: settings.operation_delay
                }
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn echo_reply_wraps_raw_text() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = shared.admit(peer(), tx, Instant::now());
        let sent_at = epoch_millis();

        route(&shared, id, "plain words");

        match reply(rx.recv().await)? {
            ServerMessage::Echo {
                original_message,
                timestamp,
            } => {
                assert_eq!(original_message, json!({"text": "plain words"}));
                assert!(timestamp >= sent_at);
            }
            other => return Err(AppError::validation(format!("Unexpected reply {:?}", other))),
        }
        assert_eq!(shared.metrics.message_count(MessageKind::Received), 1);
        assert_eq!(shared.metrics.message_count(MessageKind::Sent), 1);
        assert_eq!(shared.metrics.latency_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn numeric_operation_completes_like_any_other() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = shared.admit(peer(), tx, Instant::now());

        route(&shared, id, r#"{"operation": 5}"#);
        assert_eq!(shared.metrics.operation_count("5", OperationStatus::Initiated), 1);

        match reply(rx.recv().await)? {
            ServerMessage::OperationResponse { operation, .. } => assert_eq!(operation, "5"),
            other => return Err(AppError::validation(format!("Unexpected reply {:?}", other))),
        }
        assert_eq!(completed_count(&shared, "5").await, 1);
        assert_eq!(shared.metrics.message_count(MessageKind::Error), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failure_sends_error_and_keeps_connection() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = shared.admit(peer(), tx, Instant::now());

        let source = match serde_json::from_str::<Value>("{") {
            Err(source) => source,
            Ok(value) => return Err(AppError::validation(format!("parsed {}", value))),
        };
        report_failure(&shared, id, &RouteError::from(source));

        match reply(rx.recv().await)? {
            ServerMessage::Error { error, .. } => assert!(error.contains("encode")),
            other => return Err(AppError::validation(format!("Unexpected reply {:?}", other))),
        }
        assert!(shared.registry.contains(id));
        assert_eq!(shared.metrics.message_count(MessageKind::Error), 1);
        assert_eq!(shared.metrics.message_count(MessageKind::Sent), 0);
        Ok(())
    }

    #[tokio::test]
    async fn operation_completes_after_delay() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = shared.admit(peer(), tx, Instant::now());

        let started = Instant::now();
        route(&shared, id, r#"{"operation":"create"}"#);
        assert_eq!(
            shared
                .metrics
                .operation_count("create", OperationStatus::Initiated),
            1
        );
        assert!(rx.try_recv().is_err());

        match reply(rx.recv().await)? {
            ServerMessage::OperationResponse {
                operation, status, ..
            } => {
                assert_eq!(operation, "create");
                assert_eq!(status, "completed");
            }
            other => return Err(AppError::validation(format!("Unexpected reply {:?}", other))),
        }
        assert!(started.elapsed() >= shared.settings.create_delay);
        assert_eq!(completed_count(&shared, "create").await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn pending_response_is_dropped_when_connection_closes() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = shared.admit(peer(), tx, Instant::now());

        route(&shared, id, r#"{"operation":"delete"}"#);
        shared.release(id);
        tokio::time::sleep(shared.settings.operation_delay.saturating_mul(3)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(
            shared
                .metrics
                .operation_count("delete", OperationStatus::Completed),
            0
        );
        assert_eq!(shared.metrics.message_count(MessageKind::Sent), 0);
        Ok(())
    }

    #[tokio::test]
    async fn every_payload_refreshes_activity() -> AppResult<()> {
        let shared = test_shared(IDLE)?;
        let (tx, _rx) = mpsc::unbounded_channel();
        let admitted = Instant::now();
        let (id, _) = shared.admit(peer(), tx, admitted);

        tokio::time::sleep(Duration::from_millis(5)).await;
        route(&shared, id, r#"{"operation": true}"#);
        let last = shared.registry.liveness(id).map(|state| state.last_activity());
        assert!(last.is_some_and(|last| last > admitted));
        Ok(())
    }
}
