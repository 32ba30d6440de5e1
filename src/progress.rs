//! Completed-chunk accounting with rate-limited status reporting.

use std::time::{Duration, Instant};

use log::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(4);

/// Completed-chunk counter plus a rate-limited status reporter.
///
/// The tracker is not internally synchronized. The pipeline wraps it in
/// the same `Mutex` that guards staging writes, making staging write,
/// counter increment, and status report one critical section per chunk —
/// no lost increments, no interleaved status lines when several workers
/// finish near-simultaneously.
pub struct ProgressTracker {
    num_chunks: usize,
    completed: usize,
    last_report: Instant,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(num_chunks: usize) -> Self {
        Self::with_interval(num_chunks, REPORT_INTERVAL)
    }

    /// As `new`, with a caller-chosen reporting interval. Tests use a zero
    /// interval to force a report on every call.
    pub fn with_interval(num_chunks: usize, interval: Duration) -> Self {
        Self {
            num_chunks,
            completed: 0,
            last_report: Instant::now(),
            interval,
        }
    }

    pub fn report_completed(&mut self) {
        self.completed += 1;
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Emits `Processed X of N chunks...` if at least the reporting
    /// interval has passed since the last emission, resetting the interval
    /// clock on emit. Returns whether a status line was emitted.
    pub fn maybe_report(&mut self) -> bool {
        if self.last_report.elapsed() >= self.interval {
            info!("Processed {} of {} chunks...", self.completed, self.num_chunks);
            self.last_report = Instant::now();
            true
        } else {
            false
        }
    }
}
