use hdrhistogram::Histogram;

/// High-dynamic-range histogram of latency values in a caller-chosen unit.
///
/// The server records microseconds, the load generator milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, String> {
        let hist = Histogram::<u64>::new(3)
            .map_err(|err| format!("Failed to create histogram: {}", err))?;
        Ok(Self { hist })
    }

    /// Record a latency value. Zero is stored as one unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be recorded.
    pub fn record(&mut self, value: u64) -> Result<(), String> {
        self.hist
            .record(value.max(1))
            .map_err(|err| format!("Failed to record latency: {}", err))
    }

    #[must_use]
    pub fn percentiles(&self) -> (u64, u64, u64) {
        if self.count() == 0 {
            return (0, 0, 0);
        }

        (
            self.hist.value_at_quantile(0.5),
            self.hist.value_at_quantile(0.9),
            self.hist.value_at_quantile(0.99),
        )
    }

    /// Number of recorded values that are less than or equal to `bound`.
    #[must_use]
    pub fn count_at_or_below(&self, bound: u64) -> u64 {
        if self.count() == 0 {
            return 0;
        }
        self.hist
            .iter_recorded()
            .take_while(|value| value.value_iterated_to() <= bound)
            .map(|value| value.count_at_value())
            .sum()
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }
}
