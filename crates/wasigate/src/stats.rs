//! Cycle timing statistics.

/// Collector for dispatch cycle timings, in microseconds.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    samples: Vec<u64>,
    failures: u64,
}

impl CycleStats {
    /// Create a new empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed cycle.
    pub fn record(&mut self, us: u64) {
        self.samples.push(us);
    }

    /// Record a cycle that ended in an error.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Fold another collector's samples into this one.
    pub fn merge(&mut self, other: CycleStats) {
        self.samples.extend(other.samples);
        self.failures += other.failures;
    }

    /// Number of completed cycles.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Number of failed cycles.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Mean cycle time.
    pub fn mean_us(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    /// Median cycle time.
    pub fn p50_us(&self) -> u64 {
        self.percentile(50)
    }

    /// p99 cycle time.
    pub fn p99_us(&self) -> u64 {
        self.percentile(99)
    }

    /// Get a percentile value.
    pub fn percentile(&self, p: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Fastest cycle.
    pub fn min_us(&self) -> u64 {
        self.samples.iter().copied().min().unwrap_or(0)
    }

    /// Slowest cycle.
    pub fn max_us(&self) -> u64 {
        self.samples.iter().copied().max().unwrap_or(0)
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "n={} failed={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
            self.count(),
            self.failures,
            self.min_us(),
            self.mean_us(),
            self.p50_us(),
            self.p99_us(),
            self.max_us()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_empty() {
        let stats = CycleStats::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean_us(), 0.0);
        assert_eq!(stats.p50_us(), 0);
        assert_eq!(stats.p99_us(), 0);
    }

    #[test]
    fn test_stats_samples() {
        let mut stats = CycleStats::new();
        stats.record(100);
        stats.record(300);
        stats.record(200);
        stats.record_failure();

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.min_us(), 100);
        assert_eq!(stats.max_us(), 300);
        assert!((stats.mean_us() - 200.0).abs() < 0.001);
    }

    #[test]
    fn test_stats_percentiles() {
        let mut stats = CycleStats::new();
        for i in 1..=100 {
            stats.record(i);
        }
        // index 50 of 1..=100 holds 51
        assert_eq!(stats.p50_us(), 51);
        assert_eq!(stats.p99_us(), 100);
    }

    #[test]
    fn test_stats_merge() {
        let mut a = CycleStats::new();
        a.record(5);
        let mut b = CycleStats::new();
        b.record(15);
        b.record_failure();

        a.merge(b);
        assert_eq!(a.count(), 2);
        assert_eq!(a.failures(), 1);
        assert_eq!(a.max_us(), 15);
    }

    #[test]
    fn test_stats_summary() {
        let mut stats = CycleStats::new();
        stats.record(10);
        stats.record(20);

        let summary = stats.summary();
        assert!(summary.contains("n=2"));
        assert!(summary.contains("failed=0"));
        assert!(summary.contains("min=10us"));
        assert!(summary.contains("max=20us"));
    }
}
