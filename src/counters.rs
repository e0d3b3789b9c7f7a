//! The process-wide total-procs counter.
//!
//! Design Notes: this is the one piece of cross-thread shared state the
//! mapping core itself touches; everything else is driver-local. Modeled as
//! a single atomic fetch-add, the same primitive the surrounding runtime
//! uses for its other cross-thread counters.

use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;

lazy_static! {
    static ref TOTAL_PROCS: AtomicU64 = AtomicU64::new(0);
}

/// Advances the global process counter by `count` and returns the offset
/// (the prior total) a newly-mapped job's ranks should be reported against.
pub fn advance_total_procs(count: u32) -> u64 {
    TOTAL_PROCS.fetch_add(count as u64, Ordering::SeqCst)
}

/// The current total, for introspection/tests.
pub fn total_procs() -> u64 {
    TOTAL_PROCS.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_add_returns_increasing_offsets() {
        let first = advance_total_procs(4);
        let second = advance_total_procs(4);
        assert_eq!(second, first + 4);
        assert!(total_procs() >= second + 4);
    }
}
