//! Global atomic counters for job outcomes.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits them as a
//! single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_rejected: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_rejected: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub retries: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_submitted(&self) {
        Self::bump(&self.jobs_submitted, "jobs_submitted");
    }

    pub fn inc_rejected(&self) {
        Self::bump(&self.jobs_rejected, "jobs_rejected");
    }

    pub fn inc_succeeded(&self) {
        Self::bump(&self.jobs_succeeded, "jobs_succeeded");
    }

    pub fn inc_failed(&self) {
        Self::bump(&self.jobs_failed, "jobs_failed");
    }

    /// Timed-out jobs also count as failed.
    pub fn inc_timed_out(&self) {
        Self::bump(&self.jobs_timed_out, "jobs_timed_out");
    }

    pub fn inc_retries(&self) {
        Self::bump(&self.retries, "retries");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            jobs_submitted = s.jobs_submitted,
            jobs_rejected = s.jobs_rejected,
            jobs_succeeded = s.jobs_succeeded,
            jobs_failed = s.jobs_failed,
            jobs_timed_out = s.jobs_timed_out,
            retries = s.retries,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.jobs_submitted,
            &self.jobs_rejected,
            &self.jobs_succeeded,
            &self.jobs_failed,
            &self.jobs_timed_out,
            &self.retries,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_submitted();
        m.inc_submitted();
        m.inc_rejected();
        m.inc_timed_out();
        m.inc_failed();
        let s = m.snapshot();
        assert_eq!(s.jobs_submitted, 2);
        assert_eq!(s.jobs_rejected, 1);
        assert_eq!(s.jobs_timed_out, 1);
        assert_eq!(s.jobs_failed, 1);
        assert_eq!(s.jobs_succeeded, 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_submitted();
        m.inc_retries();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
