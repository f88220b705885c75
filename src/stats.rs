// src/stats.rs
//! Scan statistics shared between the scheduler and the reporting side

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Thread-safe scan counters
#[derive(Clone)]
pub struct ScanStats {
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    new_certificates: Arc<AtomicU64>,
    start_time: Instant,
}

/// Counters at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub new_certificates: u64,
    pub targets_per_second: f64,
    pub uptime_secs: u64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self {
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            new_certificates: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// A target answered with a chain that was recorded
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// A target could not be probed or its chain was not stored
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A certificate was seen for the first time
    pub fn record_new_certificate(&self) {
        self.new_certificates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.elapsed();
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            (succeeded + failed) as f64 / secs
        } else {
            0.0
        };

        StatsSnapshot {
            succeeded,
            failed,
            new_certificates: self.new_certificates.load(Ordering::Relaxed),
            targets_per_second: rate,
            uptime_secs: elapsed.as_secs(),
        }
    }

    /// One-line status for progress output
    pub fn format_stats(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            "{} ok | {} failed | {} new certs | {:.1} targets/s | {}",
            snapshot.succeeded,
            snapshot.failed,
            snapshot.new_certificates,
            snapshot.targets_per_second,
            Self::format_uptime(snapshot.uptime_secs)
        )
    }

    pub fn format_uptime(secs: u64) -> String {
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}
