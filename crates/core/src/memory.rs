//! The single reallocation primitive every heap allocation threads through,
//! so GC pressure accounting stays in one place (spec §4.5/§2).
//!
//! Grounded on `runtime/src/arena.rs`'s `ARENA_BYTES_ALLOCATED` counter and
//! `ARENA_RESET_THRESHOLD` (charge bytes as they're allocated, trigger
//! against a fixed threshold), reused here for a charge/collect cycle
//! instead of the teacher's charge/reset-wholesale-arena cycle, since this
//! heap frees individual objects rather than resetting a bump arena.
//! `crates/core/src/tagged_stack.rs`'s `TaggedStack::grow` is a raw
//! `Layout`-based realloc too, but tracks no byte counter of its own — it's
//! not a precedent for the accounting done here.

use std::cell::Cell;

/// Default growth-trigger threshold (bytes) before the first collection.
pub const DEFAULT_NEXT_GC: usize = 1 << 20; // 1 MiB

/// Multiplier applied to `bytes_allocated` after a collection to compute the
/// next trigger threshold (classic clox-style heap growth factor).
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// Tracks bytes charged against the heap and decides when a collection
/// should run before the next allocation is allowed to proceed.
pub struct MemoryAccount {
    bytes_allocated: Cell<usize>,
    next_gc: Cell<usize>,
    /// When set, every allocation path requests a collection regardless of
    /// the threshold (GC stress-testing mode).
    pub stress_gc: Cell<bool>,
}

impl MemoryAccount {
    pub fn new() -> MemoryAccount {
        MemoryAccount {
            bytes_allocated: Cell::new(0),
            next_gc: Cell::new(DEFAULT_NEXT_GC),
            stress_gc: Cell::new(false),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc.get()
    }

    /// Charge `new_size - old_size` against the running counter (a negative
    /// delta, i.e. `new_size < old_size`, credits the counter back — used
    /// when the GC frees objects during a sweep).
    pub fn charge(&self, old_size: usize, new_size: usize) {
        let current = self.bytes_allocated.get();
        let updated = if new_size >= old_size {
            current + (new_size - old_size)
        } else {
            current.saturating_sub(old_size - new_size)
        };
        self.bytes_allocated.set(updated);
    }

    /// Whether the caller should run a collection before the next growth,
    /// per spec: `bytes_allocated > next_gc`, or always under stress mode.
    pub fn should_collect(&self) -> bool {
        self.stress_gc.get() || self.bytes_allocated.get() > self.next_gc.get()
    }

    /// Recompute the next trigger threshold after a collection has run.
    pub fn rearm_after_collect(&self) {
        self.next_gc
            .set(self.bytes_allocated.get() * GC_HEAP_GROW_FACTOR);
    }
}

impl Default for MemoryAccount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_tracks_growth_and_shrinkage() {
        let acct = MemoryAccount::new();
        acct.charge(0, 100);
        assert_eq!(acct.bytes_allocated(), 100);
        acct.charge(100, 40);
        assert_eq!(acct.bytes_allocated(), 40);
    }

    #[test]
    fn should_collect_past_threshold() {
        let acct = MemoryAccount::new();
        assert!(!acct.should_collect());
        acct.charge(0, DEFAULT_NEXT_GC + 1);
        assert!(acct.should_collect());
    }

    #[test]
    fn stress_mode_always_collects() {
        let acct = MemoryAccount::new();
        acct.stress_gc.set(true);
        assert!(acct.should_collect());
    }

    #[test]
    fn rearm_doubles_threshold_from_live_bytes() {
        let acct = MemoryAccount::new();
        acct.charge(0, 500);
        acct.rearm_after_collect();
        assert_eq!(acct.next_gc(), 1000);
    }
}
