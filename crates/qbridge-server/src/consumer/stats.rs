//! Pool-wide delivery counters

use qbridge_common::DeliveryOutcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PoolStats {
    received: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
    settle_failures: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub requeued: u64,
    /// Outcomes the broker never heard about; those messages get redelivered.
    pub settle_failures: u64,
}

impl PoolStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settled(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Acknowledged => &self.acknowledged,
            DeliveryOutcome::Rejected { .. } => &self.rejected,
            DeliveryOutcome::Requeued { .. } => &self.requeued,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settle_failure(&self) {
        self.settle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}
