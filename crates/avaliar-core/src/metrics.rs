//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event (e.g. at the end of a CLI command).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters: no allocations, no locking.
pub struct Metrics {
    transitions_committed: AtomicU64,
    denials: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            transitions_committed: AtomicU64::new(0),
            denials: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// A state change (with its audit entry) was committed.
    pub fn inc_transitions(&self) {
        self.transitions_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "transitions_committed", "counter incremented");
    }

    /// An authorization check denied an operation.
    pub fn inc_denials(&self) {
        self.denials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "denials", "counter incremented");
    }

    /// A versioned write lost an optimistic-concurrency race.
    pub fn inc_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "conflicts", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            transitions_committed = self.transitions_committed(),
            denials = self.denials(),
            conflicts = self.conflicts(),
        );
    }

    pub fn transitions_committed(&self) -> u64 {
        self.transitions_committed.load(Ordering::Relaxed)
    }

    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.transitions_committed.store(0, Ordering::Relaxed);
        self.denials.store(0, Ordering::Relaxed);
        self.conflicts.store(0, Ordering::Relaxed);
    }
}
