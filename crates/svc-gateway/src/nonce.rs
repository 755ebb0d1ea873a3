//! Per-service monotonic nonce counter (spec.md §3 "Nonce", §4.6 outbound
//! step 1: "a monotonic 64-bit counter scoped to the service and never
//! re-used"). A single atomic is enough for the monotonicity guarantee;
//! never-reuse across process restarts is the ledger's job
//! (`RequestStore::mark_nonce_observed`), not this counter's.

use std::sync::atomic::{AtomicU64, Ordering};
use svc_core::Nonce;

pub struct NonceCounter {
    next: AtomicU64,
}

impl Default for NonceCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Resumes counting after `last_used`, e.g. after recovering from a
    /// persisted high-water mark.
    pub fn starting_after(last_used: u64) -> Self {
        Self {
            next: AtomicU64::new(last_used + 1),
        }
    }

    pub fn next(&self) -> Nonce {
        Nonce(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_strictly_increasing() {
        let counter = NonceCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a.0 < b.0 && b.0 < c.0);
    }

    #[test]
    fn resumes_after_a_high_water_mark() {
        let counter = NonceCounter::starting_after(41);
        assert_eq!(counter.next(), Nonce(42));
    }
}
