//! Metrics collection for RA processing and program installs.
//!
//! Counters are lock-free so the receive loop and API callers can record
//! without touching the filter lock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::filter::ProcessRaResult;

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcomes of RAs handed to the filter by one receive loop.
#[derive(Debug, Default)]
pub struct RaStats {
    pub received: Counter,
    /// `Match` and `UpdateExpiry`.
    pub matching: Counter,
    pub dropped: Counter,
    pub parse_errors: Counter,
    pub zero_lifetime: Counter,
    /// `UpdateExpiry` and `UpdateNewRa`.
    pub program_updates: Counter,
}

impl RaStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of one processed RA.
    pub fn record(&self, result: ProcessRaResult) {
        self.received.inc();
        match result {
            ProcessRaResult::Match => self.matching.inc(),
            ProcessRaResult::Dropped => self.dropped.inc(),
            ProcessRaResult::ParseError => self.parse_errors.inc(),
            ProcessRaResult::ZeroLifetime => self.zero_lifetime.inc(),
            ProcessRaResult::UpdateExpiry => {
                self.matching.inc();
                self.program_updates.inc();
            }
            ProcessRaResult::UpdateNewRa => self.program_updates.inc(),
        }
    }

    fn export_into(&self, prefix: &str, out: &mut Vec<(String, u64)>) {
        out.extend([
            (format!("{}received", prefix), self.received.get()),
            (format!("{}matching", prefix), self.matching.get()),
            (format!("{}dropped", prefix), self.dropped.get()),
            (format!("{}parse_errors", prefix), self.parse_errors.get()),
            (format!("{}zero_lifetime", prefix), self.zero_lifetime.get()),
            (format!("{}program_updates", prefix), self.program_updates.get()),
        ]);
    }
}

/// Global metrics registry for one filter instance.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Receive loop statistics, accumulated across restarts.
    pub ra: RaStats,

    /// Programs installed successfully.
    pub program_updates: Counter,
    /// Installs triggered by disabling the multicast filter.
    pub program_updates_allowing_multicast: Counter,
    /// Generation or install attempts that left the old program in place.
    pub install_failures: Counter,

    // Gauges describing the last installed program
    pub last_program_length: AtomicU64,
    pub last_program_lifetime: AtomicU64,
    pub filtered_ras: AtomicU64,
    pub tracked_ras: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the gauges after an install.
    pub fn record_install(&self, length: usize, lifetime: u64, filtered: usize, tracked: usize) {
        self.program_updates.inc();
        self.last_program_length.store(length as u64, Ordering::Relaxed);
        self.last_program_lifetime.store(lifetime, Ordering::Relaxed);
        self.filtered_ras.store(filtered as u64, Ordering::Relaxed);
        self.tracked_ras.store(tracked as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("program_updates".into(), self.program_updates.get()),
            (
                "program_updates_allowing_multicast".into(),
                self.program_updates_allowing_multicast.get(),
            ),
            ("install_failures".into(), self.install_failures.get()),
            (
                "last_program_length".into(),
                self.last_program_length.load(Ordering::Relaxed),
            ),
            (
                "last_program_lifetime".into(),
                self.last_program_lifetime.load(Ordering::Relaxed),
            ),
            ("filtered_ras".into(), self.filtered_ras.load(Ordering::Relaxed)),
            ("tracked_ras".into(), self.tracked_ras.load(Ordering::Relaxed)),
        ];
        self.ra.export_into("ra_", &mut result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_ra_stats_record() {
        let stats = RaStats::new();
        stats.record(ProcessRaResult::Match);
        stats.record(ProcessRaResult::UpdateExpiry);
        stats.record(ProcessRaResult::UpdateNewRa);
        stats.record(ProcessRaResult::Dropped);
        stats.record(ProcessRaResult::ParseError);
        stats.record(ProcessRaResult::ZeroLifetime);

        assert_eq!(stats.received.get(), 6);
        assert_eq!(stats.matching.get(), 2);
        assert_eq!(stats.program_updates.get(), 2);
        assert_eq!(stats.dropped.get(), 1);
        assert_eq!(stats.parse_errors.get(), 1);
        assert_eq!(stats.zero_lifetime.get(), 1);
    }

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();
        registry.record_install(420, 300, 2, 3);
        registry.ra.record(ProcessRaResult::UpdateNewRa);
        registry.program_updates_allowing_multicast.inc();

        let metrics = registry.export();
        assert!(metrics.contains(&("program_updates".into(), 1)));
        assert!(metrics.contains(&("last_program_length".into(), 420)));
        assert!(metrics.contains(&("last_program_lifetime".into(), 300)));
        assert!(metrics.contains(&("filtered_ras".into(), 2)));
        assert!(metrics.contains(&("tracked_ras".into(), 3)));
        assert!(metrics.contains(&("program_updates_allowing_multicast".into(), 1)));
        assert!(metrics.contains(&("ra_received".into(), 1)));
        assert!(metrics.contains(&("ra_program_updates".into(), 1)));
    }
}
