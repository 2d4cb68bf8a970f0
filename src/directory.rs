//! The segmented bucket directory.
//!
//! Mirrors the source's `growableArray`/`bucketArray` (see
//! `original_source/hash.go`'s `getBucketByIndex`): buckets are grouped into
//! power-of-two-sized segments, and segments themselves are lazily
//! allocated the first time a bucket inside them is materialized. Segment 0
//! is special: it holds exactly one slot (bucket 0), and that slot *is* the
//! head of the entire split-ordered list — there is no separate "list head"
//! distinct from `directory[0][0]`, matching `getBucketByIndex`'s own
//! special case for index 0.
#[cfg(not(feature = "check-loom"))]
use std::sync::atomic::{AtomicU32, Ordering as StdOrdering};
#[cfg(feature = "check-loom")]
use loom::sync::atomic::{AtomicU32, Ordering as StdOrdering};

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::list::Node;

/// Bucket indices beyond 2^32 - 1 are unrepresentable; the directory never
/// needs more than 32 segments (segment `i` covers buckets `[2^(i-1), 2^i)`
/// for `i >= 1`, plus the singleton segment 0).
pub(crate) const MAX_EXPONENT: u32 = 32;

static_assertions::const_assert_eq!(MAX_EXPONENT as usize, 32);

/// One segment: `2^(super-1)` bucket slots for `super >= 1`, or the single
/// bucket-0 slot for `super == 0`. Allocated lazily on first use and never
/// freed or reallocated afterward — `grow` only ever adds segments.
pub(crate) struct Segment<V> {
    slots: Box<[Atomic<Node<V>>]>,
}

impl<V> Segment<V> {
    fn with_len(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, Atomic::null);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }
}

/// Fields touched on every lookup, isolated on their own cache line so a
/// concurrent `grow` (which only ever appends new segments, never touches
/// these) doesn't false-share with steady-state reads.
struct Hot<V> {
    /// `rest.len()` worth of segments are guaranteed allocated once this
    /// many bits of the bucket index space are covered. Readers use this
    /// only as a hint for which segments are worth trying first; the
    /// authoritative check is always each segment slot's own null test.
    exponent: AtomicU32,
    /// The singleton segment-0 slot: the head of the split-ordered list.
    segment0: Atomic<Node<V>>,
}

/// The lazily-growing bucket directory. Segment 0 (the `Hot::segment0`
/// field) owns the entire node chain; every other segment slot is a
/// non-owning shortcut alias into that same chain, installed once by
/// `ensure_bucket` and never mutated again except by `grow` allocating new,
/// initially-all-null segments above it.
pub(crate) struct BucketDirectory<V> {
    hot: CachePadded<Hot<V>>,
    /// Indexed by `sup - 1`; `sup` ranges `1..=MAX_EXPONENT` (segment 0 is
    /// `hot.segment0`, not part of this array), so this needs
    /// `MAX_EXPONENT` slots, not `MAX_EXPONENT - 1`.
    rest: [Atomic<Segment<V>>; MAX_EXPONENT as usize],
}

/// Splits a bucket index into its segment number and offset within that
/// segment, per the scheme: segment 0 holds only bucket 0; segment `s >= 1`
/// holds buckets `[2^(s-1), 2^s)`.
pub(crate) fn super_sub(bucket: u32) -> (u32, u32) {
    if bucket == 0 {
        return (0, 0);
    }
    let sup = 32 - bucket.leading_zeros();
    let sub = bucket - (1 << (sup - 1));
    (sup, sub)
}

impl<V> BucketDirectory<V> {
    pub(crate) fn new() -> Self {
        let rest = std::array::from_fn(|_| Atomic::null());
        Self {
            hot: CachePadded::new(Hot {
                exponent: AtomicU32::new(0),
                segment0: Atomic::null(),
            }),
            rest,
        }
    }

    pub(crate) fn segment0(&self) -> &Atomic<Node<V>> {
        &self.hot.segment0
    }

    pub(crate) fn exponent(&self) -> u32 {
        self.hot.exponent.load(StdOrdering::Acquire)
    }

    fn bump_exponent(&self, covers: u32) {
        let mut current = self.hot.exponent.load(StdOrdering::Relaxed);
        while covers > current {
            match self.hot.exponent.compare_exchange_weak(
                current,
                covers,
                StdOrdering::AcqRel,
                StdOrdering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the directory slot for `bucket`, lazily allocating the
    /// covering segment (via a losing-writer-discards-its-own-allocation
    /// CAS) if it doesn't exist yet. Bucket 0 has no segment of its own —
    /// its slot is `segment0` directly.
    pub(crate) fn locate<'g>(&'g self, bucket: u32, guard: &'g Guard) -> &'g Atomic<Node<V>> {
        if bucket == 0 {
            return &self.hot.segment0;
        }
        let (sup, sub) = super_sub(bucket);
        let segment = self.ensure_segment(sup, guard);
        &segment.slots[sub as usize]
    }

    fn ensure_segment<'g>(&'g self, sup: u32, guard: &'g Guard) -> &'g Segment<V> {
        let slot = &self.rest[(sup - 1) as usize];
        let mut current = slot.load(StdOrdering::Acquire, guard);
        if current.is_null() {
            let len = 1usize << (sup - 1);
            let new_segment = Owned::new(Segment::with_len(len));
            match slot.compare_exchange(
                current,
                new_segment,
                StdOrdering::AcqRel,
                StdOrdering::Acquire,
                guard,
            ) {
                Ok(installed) => {
                    self.bump_exponent(sup + 1);
                    current = installed;
                }
                Err(CompareExchangeError { current: observed, .. }) => {
                    current = observed;
                }
            }
        }
        unsafe { current.deref() }
    }
}

impl<V> Drop for BucketDirectory<V> {
    /// `segment0` owns the entire node chain; every `rest` segment slot is
    /// a non-owning alias into a node also reachable from `segment0`.
    /// `crossbeam_epoch::Atomic::drop` frees whatever its pointee is, so
    /// the alias slots must be nulled out *before* the segments drop, or
    /// every aliased node gets freed twice. Free the owned chain first,
    /// iteratively (an owned chain can be tens of millions of nodes long;
    /// recursing would blow the stack), then let the segments' own `Drop`
    /// run over now-all-null slots.
    fn drop(&mut self) {
        unsafe {
            let mut current = self.hot.segment0.swap(Shared::null(), StdOrdering::AcqRel, crossbeam_epoch::unprotected());
            while !current.is_null() {
                let owned = current.into_owned();
                let next = owned.next.swap(Shared::null(), StdOrdering::Relaxed, crossbeam_epoch::unprotected());
                drop(owned);
                current = next;
            }

            for segment_slot in self.rest.iter() {
                let segment = segment_slot.load(StdOrdering::Acquire, crossbeam_epoch::unprotected());
                if segment.is_null() {
                    continue;
                }
                let segment_ref = segment.deref();
                for alias in segment_ref.slots.iter() {
                    alias.store(Shared::null(), StdOrdering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_sub_matches_segment_layout() {
        assert_eq!(super_sub(0), (0, 0));
        assert_eq!(super_sub(1), (1, 0));
        assert_eq!(super_sub(2), (2, 0));
        assert_eq!(super_sub(3), (2, 1));
        assert_eq!(super_sub(4), (3, 0));
        assert_eq!(super_sub(7), (3, 3));
        assert_eq!(super_sub(8), (4, 0));
    }

    #[test]
    fn locate_same_bucket_twice_returns_same_slot() {
        let dir: BucketDirectory<u32> = BucketDirectory::new();
        let guard = &crossbeam_epoch::pin();
        let a = dir.locate(5, guard) as *const _;
        let b = dir.locate(5, guard) as *const _;
        assert_eq!(a, b);
    }

    #[test]
    fn locate_bucket_zero_is_segment0() {
        let dir: BucketDirectory<u32> = BucketDirectory::new();
        let guard = &crossbeam_epoch::pin();
        let slot = dir.locate(0, guard) as *const _;
        assert_eq!(slot, dir.segment0() as *const _);
    }
}
