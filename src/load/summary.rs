use std::time::Duration;

use super::stats::{LoadStats, Sample};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub duration: Duration,
    pub target_connections: usize,
    pub peak_active: u64,
    pub total_messages: u64,
    pub failed: u64,
    pub connects: u64,
    pub connect_p50_ms: u64,
    pub connect_p90_ms: u64,
    pub connect_p99_ms: u64,
    pub samples: Vec<Sample>,
}

impl LoadSummary {
    #[must_use]
    pub fn collect(
        stats: &LoadStats,
        samples: Vec<Sample>,
        duration: Duration,
        target_connections: usize,
    ) -> Self {
        let (connect_p50_ms, connect_p90_ms, connect_p99_ms) = stats.connect_percentiles();
        Self {
            duration,
            target_connections,
            peak_active: stats.peak_active(),
            total_messages: stats.total_messages(),
            failed: stats.failed(),
            connects: stats.connects(),
            connect_p50_ms,
            connect_p90_ms,
            connect_p99_ms,
            samples,
        }
    }

    /// Messages per second, scaled by 100.
    #[must_use]
    pub fn messages_per_sec_x100(&self) -> u64 {
        let duration_ms = self.duration.as_millis().max(1);
        let scaled = u128::from(self.total_messages)
            .saturating_mul(100_000)
            .checked_div(duration_ms)
            .unwrap_or(0);
        u64::try_from(scaled).map_or(u64::MAX, |value| value)
    }

    /// Highest active count among the per-second samples.
    #[must_use]
    pub fn sampled_peak(&self) -> u64 {
        self.samples
            .iter()
            .map(|sample| sample.active)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let rate = self.messages_per_sec_x100();
        vec![
            "Test completed".to_owned(),
            format!("Duration: {}s", self.duration.as_secs()),
            format!(
                "Peak Active Connections: {} / {}",
                self.peak_active, self.target_connections
            ),
            format!("Total Messages: {}", self.total_messages),
            format!("Avg Messages/s: {}.{:02}", rate / 100, rate % 100),
            format!("Failed Connections: {}", self.failed),
            format!("Successful Handshakes: {}", self.connects),
            format!(
                "P50/P90/P99 Handshake: {}ms / {}ms / {}ms",
                self.connect_p50_ms, self.connect_p90_ms, self.connect_p99_ms
            ),
            format!("Samples: {}", self.samples.len()),
        ]
    }
}

pub fn print_summary(summary: &LoadSummary) {
    for line in summary.lines() {
        println!("{}", line);
    }
}
