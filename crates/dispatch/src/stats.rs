use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Monotonic job counters shared by submitters and worker loops.
///
/// Each job bumps exactly one terminal counter, by whichever side settled
/// its result future.
#[derive(Debug, Default)]
pub struct Statistics {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    aborted: AtomicU64,
    /// Sum of inference time over succeeded jobs, in microseconds.
    inference_micros: AtomicU64,
}

/// Point-in-time copy of [`Statistics`] for status output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub aborted: u64,
    /// Mean inference time of succeeded jobs, in milliseconds.
    pub avg_inference_ms: Option<f64>,
}

impl StatisticsSnapshot {
    /// Jobs that reached a terminal outcome.
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.rejected + self.timed_out + self.aborted
    }
}

impl Statistics {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, inference_time: Duration) {
        let micros = u64::try_from(inference_time.as_micros()).unwrap_or(u64::MAX);
        self.inference_micros.fetch_add(micros, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let micros = self.inference_micros.load(Ordering::Relaxed);
        let avg_inference_ms = (succeeded > 0).then(|| micros as f64 / succeeded as f64 / 1000.0);

        StatisticsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            avg_inference_ms,
        }
    }
}
