//! Atomically-exchangeable value slot.
//!
//! The source models a value as a raw, untyped pointer the map never
//! dereferences or frees. The idiomatic Rust shape of "opaque handle whose
//! lifecycle is not the map's concern" is `Arc<V>`: the map hands out clones
//! of the handle, and the handle's owner decides when the pointee actually
//! goes away. `arc_swap::ArcSwapOption` gives that handle an atomic
//! compare-and-swap-capable cell (the pack's precedent for this exact shape
//! is `massive-graph-core`'s use of `ArcSwap` for its document/storage
//! slots).
use std::sync::Arc;

use arc_swap::ArcSwapOption;

pub(crate) struct ValueSlot<V>(ArcSwapOption<V>);

impl<V> ValueSlot<V> {
    /// A slot with no value yet (matches a freshly constructed dummy or a
    /// real entry whose value hasn't been published — in practice real
    /// entries are always constructed with a value already, but `empty`
    /// is kept for dummy entries and tests).
    pub(crate) fn empty() -> Self {
        Self(ArcSwapOption::from(None))
    }

    pub(crate) fn new(value: Arc<V>) -> Self {
        Self(ArcSwapOption::from(Some(value)))
    }

    pub(crate) fn load(&self) -> Option<Arc<V>> {
        self.0.load_full()
    }

    /// Unconditional atomic store, used by `put`/`put_hc` overwrite.
    pub(crate) fn store(&self, value: Arc<V>) {
        self.0.store(Some(value));
    }

    /// Atomic exchange, returning the previous value.
    pub(crate) fn swap(&self, value: Arc<V>) -> Option<Arc<V>> {
        self.0.swap(Some(value))
    }

    /// Logical compare-and-swap: replace the current value with `new` only
    /// if the current value is present and `equals(current, expected)`
    /// holds. Retries against a fresh read if a concurrent writer changed
    /// the slot between the equality check and the physical swap; abandons
    /// (returns `false`) without looping if the equality check itself
    /// fails, or if the slot is currently empty.
    ///
    /// A `None` current value returns `false` without calling `equals` —
    /// the source dereferences the old value unconditionally here, which
    /// faults on an empty slot; this is the corrected behavior the spec
    /// calls out as an open question.
    pub(crate) fn compare_and_swap<F>(&self, expected: &V, new: Arc<V>, equals: &F) -> bool
    where
        F: Fn(&V, &V) -> bool,
    {
        let mut swapped = false;
        self.0.rcu(|current: &Option<Arc<V>>| -> Option<Arc<V>> {
            match current {
                Some(cur) if equals(cur, expected) => {
                    swapped = true;
                    Some(new.clone())
                }
                _ => {
                    swapped = false;
                    current.clone()
                }
            }
        });
        swapped
    }
}
