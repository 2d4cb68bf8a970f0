//! The ordered lock-free list: every entry the map has ever held, in
//! strictly non-decreasing `sort_key` order.
//!
//! This plays the role the source's `lockfree` crate (`List`/`Cursor`/
//! `Node`, consumed as a course-internal git dependency we can't fetch here)
//! played for `split_ordered_list.rs`: a small, independently-testable
//! lock-free singly-linked list keyed by a 32-bit sort key, searched and
//! extended with single-word compare-and-swap. No node is ever unlinked
//! while the map is live — deletion is out of scope (see `hash.rs`) — so
//! this module has no hazard-pointer or epoch-retire story beyond the one
//! `crossbeam_epoch` already gives every reader for safe concurrent
//! traversal.
use core::cmp::Ordering as CmpOrdering;
use core::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};

use crate::error::abort_corrupted;
use crate::key::Key;
use crate::value::ValueSlot;

/// One key/value pair and its ordering key, or a bucket's dummy marker.
///
/// `real()` is `true` iff this is a user entry (`sort_key & 1 == 1`); dummy
/// entries (bucket shortcuts) always have an even `sort_key` and no `key`.
pub(crate) struct Entry<V> {
    pub(crate) hash_code: u32,
    pub(crate) sort_key: u32,
    pub(crate) key: Option<Key>,
    pub(crate) value: ValueSlot<V>,
}

impl<V> Entry<V> {
    pub(crate) fn dummy(bucket: u32) -> Self {
        Self {
            hash_code: bucket,
            sort_key: bucket.reverse_bits() & !1,
            key: None,
            value: ValueSlot::empty(),
        }
    }

    pub(crate) fn real(hash_code: u32, key: Key, value: std::sync::Arc<V>) -> Self {
        Self {
            hash_code,
            sort_key: hash_code.reverse_bits() | 1,
            key: Some(key),
            value: ValueSlot::new(value),
        }
    }

    pub(crate) fn is_real(&self) -> bool {
        self.sort_key & 1 == 1
    }
}

/// A linked-list cell. Owns one `Entry` and an atomic pointer to the next
/// cell (or null at the tail). Set at construction; thereafter only
/// `entry.value` and `next` mutate.
pub(crate) struct Node<V> {
    pub(crate) entry: Entry<V>,
    pub(crate) next: Atomic<Node<V>>,
}

impl<V> Node<V> {
    pub(crate) fn new(entry: Entry<V>) -> Self {
        Self {
            entry,
            next: Atomic::null(),
        }
    }
}

/// The result of `search`: the position `target_sort_key` occupies (or
/// would occupy) relative to the list reachable from `from`.
///
/// `left` is always non-null (search never advances past a null `from`
/// without first observing it); it is the node whose `next` a caller must
/// CAS through `insert_before` to publish something at this position.
pub(crate) struct Hit<'g, V> {
    pub(crate) left: Shared<'g, Node<V>>,
    pub(crate) matched: Shared<'g, Node<V>>,
    pub(crate) right: Shared<'g, Node<V>>,
}

/// Walks forward from `from`, classifying each visited node by comparing
/// `target_sort_key` against its `sort_key`. Allocates nothing: the
/// returned `Hit` is a handful of epoch-protected pointers living on the
/// caller's stack.
///
/// `from` must not be null — callers always search starting from an
/// already-materialized dummy node or a node found during a previous
/// search.
pub(crate) fn search<'g, V>(
    from: Shared<'g, Node<V>>,
    target_sort_key: u32,
    guard: &'g Guard,
) -> Hit<'g, V> {
    if from.is_null() {
        abort_corrupted("list search started from a null node");
    }

    let mut left = from;
    let mut n = from;
    loop {
        if n.is_null() {
            return Hit {
                left,
                matched: Shared::null(),
                right: Shared::null(),
            };
        }
        let node = unsafe { n.deref() };
        match target_sort_key.cmp(&node.entry.sort_key) {
            CmpOrdering::Less => {
                return Hit {
                    left,
                    matched: Shared::null(),
                    right: n,
                }
            }
            CmpOrdering::Equal => {
                let right = node.next.load(Ordering::Acquire, guard);
                return Hit {
                    left,
                    matched: n,
                    right,
                };
            }
            CmpOrdering::Greater => {
                left = n;
                n = node.next.load(Ordering::Acquire, guard);
            }
        }
    }
}

/// Publishes `new_node` between `left` and `expected_next` via a single CAS
/// on `left.next`. Returns the now-reachable node on success, or hands the
/// still-unpublished `Owned` back on failure so the caller can retry or
/// discard it.
pub(crate) fn insert_before<'g, V>(
    left: Shared<'g, Node<V>>,
    mut new_node: Owned<Node<V>>,
    expected_next: Shared<'g, Node<V>>,
    guard: &'g Guard,
) -> Result<Shared<'g, Node<V>>, Owned<Node<V>>> {
    if left.is_null() {
        abort_corrupted("insert_before called with a null left neighbor");
    }
    new_node.next.store(expected_next, Ordering::Relaxed);
    let left_node = unsafe { left.deref() };
    match left_node
        .next
        .compare_exchange(expected_next, new_node, Ordering::Release, Ordering::Relaxed, guard)
    {
        Ok(installed) => Ok(installed),
        Err(CompareExchangeError { new, .. }) => Err(new),
    }
}

/// Unordered push at `head`: retries a CAS of `head` from its
/// last-observed value to a fresh node until it wins. Used only by the
/// bucket-0 initializer's test fixtures and by this module's own unit
/// tests — `Map` materializes bucket 0 with a direct CAS into the
/// directory slot instead (see `hash.rs`), since there the "head of the
/// list" and "directory slot 0" are the same cell.
#[cfg(test)]
pub(crate) fn push_front<'g, V>(
    head: &'g Atomic<Node<V>>,
    entry: Entry<V>,
    guard: &'g Guard,
) -> Shared<'g, Node<V>> {
    let mut new_node = Owned::new(Node::new(entry));
    loop {
        let current = head.load(Ordering::Acquire, guard);
        new_node.next.store(current, Ordering::Relaxed);
        match head.compare_exchange(current, new_node, Ordering::Release, Ordering::Relaxed, guard) {
            Ok(installed) => return installed,
            Err(CompareExchangeError { new, .. }) => new_node = new,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch as epoch;

    fn dummy_bucket<V>(b: u32) -> Entry<V> {
        Entry::dummy(b)
    }

    fn real_entry<V>(hc: u32, key: Key, value: std::sync::Arc<V>) -> Entry<V> {
        Entry::real(hc, key, value)
    }

    #[test]
    fn search_on_empty_list_returns_no_match() {
        let head: Atomic<Node<u32>> = Atomic::null();
        let guard = &epoch::pin();
        let from = head.load(Ordering::Acquire, guard);
        // An empty list has no dummy yet; simulate a caller starting from a
        // freshly pushed dummy.
        let from = push_front(&head, dummy_bucket(0), guard);
        let hit = search(from, 5, guard);
        assert!(hit.matched.is_null());
        assert!(hit.right.is_null());
    }

    #[test]
    fn insert_before_publishes_in_sort_key_order() {
        let head: Atomic<Node<u32>> = Atomic::null();
        let guard = &epoch::pin();
        let dummy = push_front(&head, dummy_bucket::<u32>(0), guard);

        let k1 = Key::from_u64(1);
        let k2 = Key::from_u64(2);
        let e1 = real_entry(10, k1, std::sync::Arc::new(100));
        let e2 = real_entry(20, k2, std::sync::Arc::new(200));
        let sk1 = e1.sort_key;
        let sk2 = e2.sort_key;

        let hit = search(dummy, sk1.min(sk2), guard);
        let (first, second) = if sk1 < sk2 { (e1, e2) } else { (e2, e1) };
        let first_sk = first.sort_key;
        insert_before(hit.left, Owned::new(Node::new(first)), hit.right, guard).unwrap();

        let hit2 = search(dummy, first_sk, guard);
        assert!(!hit2.matched.is_null());
        let right = unsafe { hit2.matched.deref() }.next.load(Ordering::Acquire, guard);
        insert_before(hit2.matched, Owned::new(Node::new(second)), right, guard).unwrap();

        // Walk the list and confirm non-decreasing sort_key.
        let mut cur = dummy;
        let mut last = 0u32;
        let mut count = 0;
        loop {
            let node = unsafe { cur.deref() };
            assert!(node.entry.sort_key >= last);
            last = node.entry.sort_key;
            if node.entry.is_real() {
                count += 1;
            }
            let next = node.next.load(Ordering::Acquire, guard);
            if next.is_null() {
                break;
            }
            cur = next;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn insert_before_loses_race_on_stale_expected_next() {
        let head: Atomic<Node<u32>> = Atomic::null();
        let guard = &epoch::pin();
        let dummy = push_front(&head, dummy_bucket::<u32>(0), guard);

        let e1 = real_entry(1, Key::from_u64(1), std::sync::Arc::new(1));
        let e2 = real_entry(2, Key::from_u64(2), std::sync::Arc::new(2));

        let hit = search(dummy, 0, guard);
        // Insert e1 first, capturing the stale `right`.
        let stale_right = hit.right;
        insert_before(hit.left, Owned::new(Node::new(e1)), stale_right, guard).unwrap();

        // Retrying insert_before with the now-stale `expected_next` must fail.
        let result = insert_before(hit.left, Owned::new(Node::new(e2)), stale_right, guard);
        assert!(result.is_err());
    }
}
