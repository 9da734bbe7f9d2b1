//! Engine-wide redelivery counters
//!
//! Tracks, across every exchange a processor has seen:
//! - Submissions and how they ended
//! - Failed attempts and redeliveries
//! - Retry predicate evaluations

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::disposition::Disposition;

#[derive(Debug, Default)]
pub struct RedeliveryStats {
    submitted: AtomicU64,
    failures: AtomicU64,
    redeliveries: AtomicU64,
    predicate_evaluations: AtomicU64,
    exhausted: AtomicU64,
    aborted: AtomicU64,
    completed: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    propagated: AtomicU64,
    fatal: AtomicU64,
}

/// Point-in-time copy of [`RedeliveryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    /// Failed attempts, each one counted against a policy
    pub failures: u64,
    pub redeliveries: u64,
    pub predicate_evaluations: u64,
    /// Loops that stopped because the bound or predicate said so
    pub exhausted: u64,
    /// Loops that stopped on a predicate error or cancellation
    pub aborted: u64,
    pub completed: u64,
    pub handled: u64,
    pub failed: u64,
    pub propagated: u64,
    pub fatal: u64,
}

impl RedeliveryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submission(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redelivery(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_predicate_evaluation(&self) {
        self.predicate_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disposition(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Completed => &self.completed,
            Disposition::Handled => &self.handled,
            Disposition::Failed => &self.failed,
            Disposition::Propagated => &self.propagated,
            Disposition::Fatal => &self.fatal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            predicate_evaluations: self.predicate_evaluations.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            propagated: self.propagated.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn dispositions_land_in_their_counter() {
        let stats = RedeliveryStats::new();
        stats.record_submission();
        stats.record_failure();
        stats.record_disposition(Disposition::Handled);
        stats.record_disposition(Disposition::Handled);
        stats.record_disposition(Disposition::Fatal);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                submitted: 1,
                failures: 1,
                handled: 2,
                fatal: 1,
                ..StatsSnapshot::default()
            }
        );
    }
}
