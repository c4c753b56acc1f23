//! Compile-call counters and timings.
//!
//! One [`CompilationMetrics`] lives in [`ViewCompilationServices`](crate::ViewCompilationServices)
//! and is shared by every clone of it, so concurrent compilations against the
//! same services all feed the same counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free counters updated once per compile call.
#[derive(Debug, Default)]
pub struct CompilationMetrics {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_time_ns: AtomicU64,
    last_time_ns: AtomicU64,
}

/// Point-in-time copy of [`CompilationMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompilationStats {
    /// Compile calls entered.
    pub compilations_started: u64,
    /// Compile calls that returned a compiled view.
    pub compilations_succeeded: u64,
    /// Compile calls that returned an error, cancellation included.
    pub compilations_failed: u64,
    /// Wall time spent in finished compile calls.
    pub total_time_ns: u64,
    /// Wall time of the most recently finished compile call.
    pub last_time_ns: u64,
}

impl CompilationStats {
    /// Mean wall time of a finished compile call, zero before the first one.
    pub fn avg_time_ns(&self) -> u64 {
        let finished = self.compilations_succeeded + self.compilations_failed;
        if finished == 0 {
            0
        } else {
            self.total_time_ns / finished
        }
    }
}

impl CompilationMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a compile call as entered.
    pub fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a finished compile call and adds its wall time.
    pub fn record_finish(&self, elapsed: Duration, succeeded: bool) {
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.last_time_ns.store(elapsed_ns, Ordering::Relaxed);
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> CompilationStats {
        CompilationStats {
            compilations_started: self.started.load(Ordering::Relaxed),
            compilations_succeeded: self.succeeded.load(Ordering::Relaxed),
            compilations_failed: self.failed.load(Ordering::Relaxed),
            total_time_ns: self.total_time_ns.load(Ordering::Relaxed),
            last_time_ns: self.last_time_ns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_times() {
        let metrics = CompilationMetrics::new();
        assert_eq!(metrics.snapshot(), CompilationStats::default());
        assert_eq!(metrics.snapshot().avg_time_ns(), 0);

        metrics.record_start();
        metrics.record_finish(Duration::from_micros(30), true);
        metrics.record_start();
        metrics.record_finish(Duration::from_micros(10), false);

        let stats = metrics.snapshot();
        assert_eq!(stats.compilations_started, 2);
        assert_eq!(stats.compilations_succeeded, 1);
        assert_eq!(stats.compilations_failed, 1);
        assert_eq!(stats.total_time_ns, 40_000);
        assert_eq!(stats.last_time_ns, 10_000);
        assert_eq!(stats.avg_time_ns(), 20_000);
    }
}
