//! The top-level split-ordered hash map: `Map<V>`.
//!
//! Wires the ordered list (`list.rs`) and the bucket directory
//! (`directory.rs`) together into `put`/`get`/`put_if_missing`/
//! `put_if_present`/`size`/`each`/`to_map`, following
//! `original_source/hash.go`'s `Hash` type and the teacher's
//! `split_ordered_list.rs` structure (a `put`/`get`/`remove` struct wrapping
//! a growable directory and a shared list).
use std::collections::HashMap;
#[cfg(not(feature = "check-loom"))]
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
#[cfg(feature = "check-loom")]
use loom::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use log::{debug, trace};

use crate::directory::{BucketDirectory, MAX_EXPONENT};
use crate::key::{self, Key};
use crate::list::{self, Entry, Node};
use crate::scratch::Scratch;

/// Directory grows once live entries exceed half the bucket count.
const LOAD_FACTOR: f64 = 0.5;

/// Lock-free, concurrently resizable hash map keyed by [`Key`], valued by
/// `Arc<V>`.
///
/// Implements the Shalev & Shavit (2006) split-ordered list: every entry
/// ever inserted lives in one sorted linked list (`directory.segment0`
/// downward), and the bucket directory holds shortcut references into that
/// list so a lookup doesn't have to walk from the very front.
///
/// # Invariants
/// 1. The list is in strictly non-decreasing `sort_key` order; at most one
///    real entry exists per `(sort_key, key)` pair.
/// 2. For each materialized bucket `b`, its directory slot references a
///    dummy node with `sort_key == reverse(b) & !1`, physically present at
///    a position where every predecessor has strictly smaller `sort_key`.
/// 3. For every real entry `e`, the dummy for bucket
///    `e.hash_code % 2^exponent` appears before `e` in the list.
/// 4. `exponent` is monotonically non-decreasing.
/// 5. `size` equals the number of real entries reachable from the list.
pub struct Map<V> {
    exponent: AtomicU32,
    size: AtomicI64,
    directory: BucketDirectory<V>,
}

/// Outcome of searching the list for a specific real key from a bucket's
/// dummy node. Distinguishes "no node at this sort_key" from "a node
/// exists at this sort_key but its full key differs" (hash collision),
/// matching `original_source/hash.go`'s `hashHit.search` loop.
enum Probe<'g, V> {
    Absent {
        left: Shared<'g, Node<V>>,
        right: Shared<'g, Node<V>>,
    },
    Found {
        node: Shared<'g, Node<V>>,
    },
}

impl<V> Default for Map<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Map<V> {
    pub fn new() -> Self {
        Self {
            exponent: AtomicU32::new(0),
            size: AtomicI64::new(0),
            directory: BucketDirectory::new(),
        }
    }

    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Acquire)
    }

    /// Current directory level: live buckets are indices
    /// `0..2^exponent()`. Monotonically non-decreasing. Exposed mainly for
    /// diagnostics and tests that want to confirm growth fired.
    pub fn exponent(&self) -> u32 {
        self.exponent.load(Ordering::Acquire)
    }

    fn bucket_for(&self, hash_code: u32) -> u32 {
        let exponent = self.exponent();
        if exponent >= 32 {
            hash_code
        } else {
            hash_code & ((1u32 << exponent) - 1)
        }
    }

    /// Clears the highest set bit of `b`: the bucket whose dummy sits
    /// immediately before `b`'s dummy in list order.
    fn parent_bucket(b: u32) -> u32 {
        if b == 0 {
            0
        } else {
            b & (b - 1)
        }
    }

    /// Returns the dummy node for bucket `b`, materializing it (and every
    /// unmaterialized ancestor) if necessary.
    ///
    /// Rewritten iteratively per the design notes: first ascend collecting
    /// unmaterialized ancestors in a fixed-size stack (bounded by
    /// `MAX_EXPONENT`, so no heap allocation even on the cold path), then
    /// descend materializing each in turn.
    fn ensure_bucket<'g>(&'g self, b: u32, guard: &'g Guard) -> Shared<'g, Node<V>> {
        if let Some(dummy) = self.read_slot(b, guard) {
            return dummy;
        }

        let mut stack = [0u32; (MAX_EXPONENT + 1) as usize];
        let mut depth = 0usize;
        let mut current = b;
        loop {
            stack[depth] = current;
            depth += 1;
            if current == 0 {
                break;
            }
            let parent = Self::parent_bucket(current);
            if self.read_slot(parent, guard).is_some() {
                stack[depth] = parent;
                depth += 1;
                break;
            }
            current = parent;
        }

        // stack[depth-1] is already materialized (or is bucket 0, handled
        // inside materialize_one); descend installing each of the rest.
        let mut dummy = self.read_slot(stack[depth - 1], guard).unwrap_or_else(|| {
            debug_assert_eq!(stack[depth - 1], 0);
            self.materialize_one(0, Shared::null(), guard)
        });
        for i in (0..depth - 1).rev() {
            dummy = self.materialize_one(stack[i], dummy, guard);
        }
        dummy
    }

    fn read_slot<'g>(&'g self, b: u32, guard: &'g Guard) -> Option<Shared<'g, Node<V>>> {
        let slot = self.directory.locate(b, guard);
        let current = slot.load(Ordering::Acquire, guard);
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Materializes bucket `b`'s dummy node given its parent's
    /// already-materialized dummy (ignored for `b == 0`, which installs
    /// directly into `directory.segment0`). Retries internally until the
    /// slot is observably non-null.
    fn materialize_one<'g>(
        &'g self,
        b: u32,
        parent_dummy: Shared<'g, Node<V>>,
        guard: &'g Guard,
    ) -> Shared<'g, Node<V>> {
        loop {
            if let Some(existing) = self.read_slot(b, guard) {
                return existing;
            }

            if b == 0 {
                let new_node = Owned::new(Node::new(Entry::dummy(0)));
                let slot = self.directory.segment0();
                match slot.compare_exchange(
                    Shared::null(),
                    new_node,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(installed) => {
                        trace!("materialized bucket 0 (segment0)");
                        return installed;
                    }
                    Err(_) => continue,
                }
            }

            debug_assert!(!parent_dummy.is_null());
            let target_sort_key = b.reverse_bits() & !1;
            let hit = list::search(parent_dummy, target_sort_key, guard);
            if !hit.matched.is_null() {
                // Another thread already linked a dummy at this sort_key;
                // install the shortcut (or lose the race to a peer doing
                // the same) and move on.
                let slot = self.directory.locate(b, guard);
                match slot.compare_exchange(
                    Shared::null(),
                    unsafe { Owned::from_raw(hit.matched.as_raw() as *mut Node<V>) },
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(installed) => return installed,
                    Err(err) => {
                        // Someone else installed first; leak our Owned
                        // wrapper without dropping the (shared, still
                        // reachable from the list) node it pointed at.
                        std::mem::forget(err.new.into_box());
                        continue;
                    }
                }
            }

            let new_node = Owned::new(Node::new(Entry::dummy(b)));
            match list::insert_before(hit.left, new_node, hit.right, guard) {
                Ok(installed) => {
                    let slot = self.directory.locate(b, guard);
                    match slot.compare_exchange(
                        Shared::null(),
                        unsafe { Owned::from_raw(installed.as_raw() as *mut Node<V>) },
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        Ok(dummy) => {
                            trace!("materialized bucket {b}");
                            return dummy;
                        }
                        Err(err) => {
                            std::mem::forget(err.new.into_box());
                            return installed;
                        }
                    }
                }
                Err(_) => continue,
            }
        }
    }

    /// Searches for `key` (whose hash is `hash_code`) starting from
    /// `from`, resolving hash collisions by advancing past any node that
    /// matches on `sort_key` but not on the full key.
    fn probe<'g>(
        &self,
        from: Shared<'g, Node<V>>,
        hash_code: u32,
        key: &Key,
        guard: &'g Guard,
    ) -> Probe<'g, V> {
        let target_sort_key = hash_code.reverse_bits() | 1;
        let hit = list::search(from, target_sort_key, guard);
        let mut left = hit.left;
        let mut candidate = hit.matched;
        let mut right = hit.right;
        while !candidate.is_null() {
            let node = unsafe { candidate.deref() };
            if node.entry.key.as_ref() == Some(key) {
                return Probe::Found { node: candidate };
            }
            // Same sort_key, different key: a genuine hash collision.
            // Walk forward through the run of same-sort_key nodes by hand
            // (re-entering `search` here would reclassify `candidate`
            // itself as the match and spin forever).
            left = candidate;
            candidate = right;
            right = Shared::null();
            if !candidate.is_null() {
                let next = unsafe { candidate.deref() };
                if next.entry.sort_key == target_sort_key {
                    right = next.next.load(Ordering::Acquire, guard);
                } else {
                    return Probe::Absent { left, right: candidate };
                }
            }
        }
        Probe::Absent { left, right }
    }

    fn maybe_grow(&self, guard: &Guard) {
        let exponent = self.exponent();
        if exponent >= MAX_EXPONENT {
            return;
        }
        let size = self.size.load(Ordering::Acquire) as f64;
        let buckets = (1u64 << exponent) as f64;
        if size > LOAD_FACTOR * buckets {
            // Touching the would-be new top bucket forces its segment (and
            // every ancestor on the path) to materialize, then bumps
            // exponent — mirrors directory::grow's "allocate then CAS
            // exponent" sequencing without duplicating directory-internal
            // state here.
            let next_exponent = exponent + 1;
            self.ensure_bucket(1u32 << exponent, guard);
            self.bump_exponent(next_exponent);
        }
    }

    /// Raises `exponent` to at least `next`, losing gracefully to a peer
    /// that races it to a higher value. The one racy write in `Map` that
    /// actually changes lookup/growth behavior — `check-loom` instruments
    /// this directly (see `loom_tests` below) rather than only the
    /// directory's internal allocation hint.
    fn bump_exponent(&self, next: u32) {
        let mut current = self.exponent.load(Ordering::Relaxed);
        while next > current {
            match self.exponent.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug!("grew directory to exponent {next}");
                    break;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Looks up `key`, computing its hash internally.
    pub fn get(&self, key: &Key) -> Option<Arc<V>> {
        let hash_code = crate::key::hash(key);
        self.get_hc(hash_code, key, &mut Scratch::new())
    }

    /// Looks up `key` using a precomputed hash and caller-owned scratch.
    pub fn get_hc(&self, hash_code: u32, key: &Key, _scratch: &mut Scratch<V>) -> Option<Arc<V>> {
        let guard = &epoch::pin();
        let bucket = self.bucket_for(hash_code);
        let dummy = self.ensure_bucket(bucket, guard);
        match self.probe(dummy, hash_code, key, guard) {
            Probe::Found { node } => unsafe { node.deref() }.entry.value.load(),
            Probe::Absent { .. } => None,
        }
    }

    /// Inserts or overwrites `key`'s value, computing its hash internally.
    /// Returns the previous value, if any.
    pub fn put(&self, key: Key, value: Arc<V>) -> Option<Arc<V>> {
        let hash_code = key::hash(&key);
        self.put_hc(hash_code, key, value)
    }

    /// Inserts or overwrites using a precomputed hash. Returns the
    /// previous value, if any.
    pub fn put_hc(&self, hash_code: u32, key: Key, value: Arc<V>) -> Option<Arc<V>> {
        let guard = &epoch::pin();
        let bucket = self.bucket_for(hash_code);
        let dummy = self.ensure_bucket(bucket, guard);
        loop {
            match self.probe(dummy, hash_code, &key, guard) {
                Probe::Found { node } => {
                    let previous = unsafe { node.deref() }.entry.value.swap(value);
                    return previous;
                }
                Probe::Absent { left, right } => {
                    let entry = Entry::real(hash_code, key, value.clone());
                    let new_node = Owned::new(Node::new(entry));
                    match list::insert_before(left, new_node, right, guard) {
                        Ok(_) => {
                            self.size.fetch_add(1, Ordering::AcqRel);
                            self.maybe_grow(guard);
                            return None;
                        }
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// Inserts `key` only if absent. Returns `true` iff a new entry was
    /// created; never replaces an existing value.
    pub fn put_if_missing(&self, key: Key, value: Arc<V>) -> bool {
        let hash_code = key::hash(&key);
        let guard = &epoch::pin();
        let bucket = self.bucket_for(hash_code);
        let dummy = self.ensure_bucket(bucket, guard);
        loop {
            match self.probe(dummy, hash_code, &key, guard) {
                Probe::Found { .. } => return false,
                Probe::Absent { left, right } => {
                    let entry = Entry::real(hash_code, key.clone(), value.clone());
                    let new_node = Owned::new(Node::new(entry));
                    match list::insert_before(left, new_node, right, guard) {
                        Ok(_) => {
                            self.size.fetch_add(1, Ordering::AcqRel);
                            self.maybe_grow(guard);
                            return true;
                        }
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// Replaces `key`'s value with `new` only if it is currently present
    /// and `equals(current, expected)` holds. A missing entry returns
    /// `false` without invoking `equals` — the corrected behavior for the
    /// source's null-dereferencing `PutIfPresent`.
    pub fn put_if_present<F>(&self, key: &Key, new: Arc<V>, expected: &V, equals: F) -> bool
    where
        F: Fn(&V, &V) -> bool,
    {
        let hash_code = key::hash(key);
        let guard = &epoch::pin();
        let bucket = self.bucket_for(hash_code);
        let dummy = self.ensure_bucket(bucket, guard);
        match self.probe(dummy, hash_code, key, guard) {
            Probe::Found { node } => unsafe { node.deref() }
                .entry
                .value
                .compare_and_swap(expected, new, &equals),
            Probe::Absent { .. } => false,
        }
    }

    /// Visits every real entry in list order (not user-key order). Stops
    /// early and returns `true` the moment `iter` returns `true`.
    /// Not snapshot-isolated: entries inserted concurrently with the walk
    /// may or may not be visited, but no entry is visited twice and no
    /// entry is fabricated.
    pub fn each<F>(&self, mut iter: F) -> bool
    where
        F: FnMut(&Key, &V) -> bool,
    {
        let guard = &epoch::pin();
        let mut current = self.directory.segment0().load(Ordering::Acquire, guard);
        while !current.is_null() {
            let node = unsafe { current.deref() };
            if node.entry.is_real() {
                if let (Some(key), Some(value)) = (node.entry.key.as_ref(), node.entry.value.load()) {
                    if iter(key, &value) {
                        return true;
                    }
                }
            }
            current = node.next.load(Ordering::Acquire, guard);
        }
        false
    }

    /// Best-effort, non-atomic snapshot copy into a `HashMap`. Walks the
    /// list directly (rather than through `each`) so it can collect
    /// `Arc<V>` clones instead of borrowed references.
    pub fn to_map(&self) -> HashMap<Key, Arc<V>> {
        let guard = &epoch::pin();
        let mut out = HashMap::new();
        let mut current = self.directory.segment0().load(Ordering::Acquire, guard);
        while !current.is_null() {
            let node = unsafe { current.deref() };
            if node.entry.is_real() {
                if let (Some(key), Some(value)) = (node.entry.key, node.entry.value.load()) {
                    out.insert(key, value);
                }
            }
            current = node.next.load(Ordering::Acquire, guard);
        }
        out
    }
}

#[cfg(test)]
impl<V: std::fmt::Debug> Map<V> {
    /// Multi-line description of the list's contents, one line per node,
    /// bucket-dummy lines marked with `*`. Ported from
    /// `original_source/hash.go`'s `Hash.Describe`/`Hash.String` — useful
    /// for diagnosing invariant-violation test failures, not part of the
    /// public runtime API. A node's dummy-ness stands in for the original's
    /// `isBucket` lookup: every dummy this crate ever creates is installed
    /// into the directory by `materialize_one` in the same breath it's
    /// linked into the list, so "dummy" and "is some bucket's shortcut"
    /// coincide.
    pub(crate) fn describe(&self) -> String {
        use std::fmt::Write as _;

        let guard = &epoch::pin();
        let mut out = String::new();
        let _ = writeln!(out, "Map {{ size: {}, exponent: {} }}", self.size(), self.exponent());
        let mut current = self.directory.segment0().load(Ordering::Acquire, guard);
        while !current.is_null() {
            let node = unsafe { current.deref() };
            match node.entry.key {
                Some(key) => {
                    let value = node.entry.value.load();
                    let _ = writeln!(
                        out,
                        "  sort_key={:08x} hash_code={:08x} key={:?} value={:?}",
                        node.entry.sort_key, node.entry.hash_code, key, value
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  sort_key={:08x} bucket={} *",
                        node.entry.sort_key, node.entry.hash_code
                    );
                }
            }
            current = node.next.load(Ordering::Acquire, guard);
        }
        out
    }
}

#[cfg(test)]
impl<V: std::fmt::Debug> std::fmt::Debug for Map<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_bucket_dummies_and_real_entries() {
        let map: Map<u64> = Map::new();
        map.put(Key::from_u64(1), Arc::new(100));
        map.put(Key::from_u64(2), Arc::new(200));

        let described = map.describe();
        assert!(described.contains("bucket=0 *"));
        assert!(described.contains("value=Some(100)"));
        assert!(described.contains("value=Some(200)"));
        assert_eq!(format!("{map:?}"), described);
    }

    #[test]
    fn parent_bucket_clears_highest_set_bit() {
        assert_eq!(Map::<u64>::parent_bucket(0), 0);
        assert_eq!(Map::<u64>::parent_bucket(1), 0);
        assert_eq!(Map::<u64>::parent_bucket(5), 4);
        assert_eq!(Map::<u64>::parent_bucket(8), 0);
    }
}

/// `Map::exponent` (not `directory.rs`'s internal allocation hint) is the
/// field `bucket_for`/`maybe_grow` actually use to route lookups and decide
/// when to grow, so it's the one worth checking exhaustively under loom.
/// `ensure_bucket`'s own CAS runs through `crossbeam_epoch`, which isn't
/// loom-instrumented, so this isolates just the `exponent` race the same
/// way `directory.rs`'s `loom_tests` isolates `bump_exponent`.
#[cfg(all(test, feature = "check-loom"))]
mod loom_tests {
    use super::*;

    #[test]
    fn concurrent_exponent_bumps_converge_on_the_max() {
        loom::model(|| {
            let map = loom::sync::Arc::new(Map::<u32>::new());
            let m1 = map.clone();
            let m2 = map.clone();
            let t1 = loom::thread::spawn(move || m1.bump_exponent(3));
            let t2 = loom::thread::spawn(move || m2.bump_exponent(5));
            t1.join().unwrap();
            t2.join().unwrap();
            assert_eq!(map.exponent(), 5);
        });
    }
}
