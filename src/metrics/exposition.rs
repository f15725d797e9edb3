use std::fmt::Write as _;
use std::time::Duration;

use super::telemetry::{MessageKind, ServerMetrics};
use crate::system::process::read_rss_bytes;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders every server instrument in the Prometheus text format.
#[must_use]
pub fn render_prometheus(metrics: &ServerMetrics) -> String {
    let mut output = String::new();

    write_header(
        &mut output,
        "websocket_connections_total",
        "Total number of active WebSocket connections",
        "gauge",
    );
    write_line(
        &mut output,
        &format!(
            "websocket_connections_total {}",
            metrics.active_connections()
        ),
    );

    write_header(
        &mut output,
        "websocket_messages_total",
        "Total number of WebSocket messages",
        "counter",
    );
    for kind in MessageKind::ALL {
        write_line(
            &mut output,
            &format!(
                "websocket_messages_total{{type=\"{}\"}} {}",
                kind.as_str(),
                metrics.message_count(kind)
            ),
        );
    }

    write_header(
        &mut output,
        "container_operations_total",
        "Total number of container operations",
        "counter",
    );
    for ((operation, status), count) in metrics.operations_snapshot() {
        write_line(
            &mut output,
            &format!(
                "container_operations_total{{operation=\"{}\",status=\"{}\"}} {}",
                escape_label(&operation),
                status.as_str(),
                count
            ),
        );
    }

    write_header(
        &mut output,
        "websocket_message_latency_seconds",
        "Latency of WebSocket message processing in seconds",
        "histogram",
    );
    let (buckets, sum, count) = metrics.latency_snapshot();
    for (label, cumulative) in buckets {
        write_line(
            &mut output,
            &format!(
                "websocket_message_latency_seconds_bucket{{le=\"{}\"}} {}",
                label, cumulative
            ),
        );
    }
    write_line(
        &mut output,
        &format!(
            "websocket_message_latency_seconds_bucket{{le=\"+Inf\"}} {}",
            count
        ),
    );
    write_line(
        &mut output,
        &format!("websocket_message_latency_seconds_sum {}", seconds_micros(sum)),
    );
    write_line(
        &mut output,
        &format!("websocket_message_latency_seconds_count {}", count),
    );

    write_header(
        &mut output,
        "http_requests_total",
        "Total number of HTTP requests",
        "counter",
    );
    for ((method, route, status), count) in metrics.http_snapshot() {
        write_line(
            &mut output,
            &format!(
                "http_requests_total{{method=\"{}\",route=\"{}\",status=\"{}\"}} {}",
                escape_label(&method),
                escape_label(&route),
                status,
                count
            ),
        );
    }

    if let Some(rss) = read_rss_bytes() {
        write_header(
            &mut output,
            "process_resident_memory_bytes",
            "Resident memory size in bytes.",
            "gauge",
        );
        write_line(&mut output, &format!("process_resident_memory_bytes {}", rss));
    }

    write_header(
        &mut output,
        "process_uptime_seconds",
        "Seconds since the broadcaster started.",
        "gauge",
    );
    write_line(
        &mut output,
        &format!("process_uptime_seconds {}", seconds_millis(metrics.uptime())),
    );

    output
}

fn seconds_micros(duration: Duration) -> String {
    format!("{}.{:06}", duration.as_secs(), duration.subsec_micros())
}

fn seconds_millis(duration: Duration) -> String {
    format!("{}.{:03}", duration.as_secs(), duration.subsec_millis())
}

fn write_header(output: &mut String, name: &str, help: &str, kind: &str) {
    write_line(output, &format!("# HELP {} {}", name, help));
    write_line(output, &format!("# TYPE {} {}", name, kind));
}

fn write_line(output: &mut String, line: &str) {
    // Writing into a String cannot fail.
    drop(writeln!(output, "{}", line));
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_label;

    #[test]
    fn labels_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
