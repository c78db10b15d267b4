//! Global atomic counters.
//!
//! Counters are bumped silently at the call site; [`Metrics::flush`] emits
//! them as one `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    jobs_dispatched: AtomicU64,
    jobs_timed_out: AtomicU64,
    alerts_sent: AtomicU64,
    polls_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_dispatched: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_jobs_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_dispatched", "counter incremented");
    }

    pub fn inc_jobs_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_timed_out", "counter incremented");
    }

    pub fn inc_alerts_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "alerts_sent", "counter incremented");
    }

    pub fn inc_polls_failed(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "polls_failed", "counter incremented");
    }

    /// Emit all current values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_dispatched = self.jobs_dispatched(),
            jobs_timed_out = self.jobs_timed_out(),
            alerts_sent = self.alerts_sent(),
            polls_failed = self.polls_failed(),
        );
    }

    pub fn jobs_dispatched(&self) -> u64 {
        self.jobs_dispatched.load(Ordering::Relaxed)
    }

    pub fn jobs_timed_out(&self) -> u64 {
        self.jobs_timed_out.load(Ordering::Relaxed)
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    pub fn polls_failed(&self) -> u64 {
        self.polls_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters (tests).
    pub fn reset(&self) {
        self.jobs_dispatched.store(0, Ordering::Relaxed);
        self.jobs_timed_out.store(0, Ordering::Relaxed);
        self.alerts_sent.store(0, Ordering::Relaxed);
        self.polls_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let m = Metrics::new();
        m.inc_jobs_dispatched();
        m.inc_jobs_dispatched();
        m.inc_jobs_timed_out();
        m.inc_alerts_sent();
        assert_eq!(m.jobs_dispatched(), 2);
        assert_eq!(m.jobs_timed_out(), 1);
        assert_eq!(m.alerts_sent(), 1);
        assert_eq!(m.polls_failed(), 0);
    }

    #[test]
    fn test_reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_polls_failed();
        m.inc_alerts_sent();
        m.reset();
        assert_eq!(m.polls_failed(), 0);
        assert_eq!(m.alerts_sent(), 0);
    }
}
