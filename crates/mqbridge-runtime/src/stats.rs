//! Per-bridge delivery counters.
//!
//! Failures on both data paths are discarded by policy; counting them keeps
//! that policy observable.

use std::sync::atomic::{AtomicU64, Ordering};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Forwarded,
    /// Dropped by the bridge's message filter.
    Filtered,
    RateLimited,
    /// Encode, decode or publish failed; the delivery was dropped.
    Failed,
    /// Routed to the process supervisor instead of the data path.
    Control,
    /// Reverse bridge without a topic-bus destination.
    Skipped,
}

#[derive(Debug, Default)]
pub struct BridgeStats {
    forwarded: AtomicU64,
    filtered: AtomicU64,
    rate_limited: AtomicU64,
    failed: AtomicU64,
    control: AtomicU64,
}

/// Point-in-time copy of a [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub forwarded: u64,
    pub filtered: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub control: u64,
}

impl BridgeStats {
    pub fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Forwarded => &self.forwarded,
            DeliveryOutcome::Filtered => &self.filtered,
            DeliveryOutcome::RateLimited => &self.rate_limited,
            DeliveryOutcome::Failed => &self.failed,
            DeliveryOutcome::Control => &self.control,
            DeliveryOutcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
        }
    }
}
