//! Multi-threaded stress scenarios (S5-S7) plus the single-threaded seed
//! scenarios (S1-S4). Uses plain `std::thread`, matching the teacher's
//! `hello_server` test style — the core is synchronous and blocking-free,
//! so there is no async runtime to pull in.
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use split_ordered_map::{Key, Map};

#[test]
fn s1_fresh_map_put_then_get() {
    let map = Map::new();
    let k1 = Key::from_u64(1);
    let k2 = Key::from_u64(2);

    assert_eq!(map.put(k1, Arc::new(10)), None);
    assert_eq!(map.get(&k1).as_deref(), Some(&10));
    assert_eq!(map.get(&k2), None);
}

#[test]
fn s2_put_overwrites_and_reports_previous() {
    let map = Map::new();
    let k1 = Key::from_u64(1);

    assert_eq!(map.put(k1, Arc::new(1)), None);
    assert_eq!(map.put(k1, Arc::new(2)).as_deref(), Some(&1));
    assert_eq!(map.get(&k1).as_deref(), Some(&2));
    assert_eq!(map.size(), 1);
}

#[test]
fn s3_put_if_missing_is_idempotent() {
    let map = Map::new();
    let k1 = Key::from_u64(1);

    assert!(map.put_if_missing(k1, Arc::new(1)));
    assert!(!map.put_if_missing(k1, Arc::new(2)));
    assert_eq!(map.get(&k1).as_deref(), Some(&1));
}

#[test]
fn s4_single_threaded_bulk_insert_triggers_growth() {
    let map = Map::new();
    for i in 0..1024u64 {
        map.put(Key::from_u64(i), Arc::new(i));
    }
    assert_eq!(map.size(), 1024);

    let mut seen = HashSet::new();
    map.each(|k, v| {
        seen.insert(*k);
        assert_eq!(*v, key_as_u64(k));
        false
    });
    assert_eq!(seen.len(), 1024);

    assert!(map.exponent() >= 11);
}

fn key_as_u64(k: &Key) -> u64 {
    let bytes = k.as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

#[test]
fn s5_disjoint_keys_from_many_threads_all_land() {
    let _ = env_logger::try_init();
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 10_000;

    let map = Arc::new(Map::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let id = t * PER_THREAD + i;
                    map.put(Key::from_u64(id), Arc::new(id));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(map.size() as u64, THREADS * PER_THREAD);
    for id in 0..(THREADS * PER_THREAD) {
        assert_eq!(map.get(&Key::from_u64(id)).as_deref(), Some(&id));
    }
}

#[test]
fn s6_contended_same_key_converges_to_one_writer() {
    const THREADS: u64 = 8;
    let map = Arc::new(Map::new());
    let key = Key::from_u64(7);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..500 {
                    map.put(key, Arc::new(t));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let winner = *map.get(&key).expect("key present");
    assert!(winner < THREADS);
    assert_eq!(map.size(), 1);
}

#[test]
fn s7_concurrent_each_sees_no_duplicates_and_only_real_keys() {
    const WRITERS: u64 = 4;
    const READERS: u64 = 4;
    const PER_WRITER: u64 = 2_000;

    let map = Arc::new(Map::new());
    let mut handles = Vec::new();

    for w in 0..WRITERS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..PER_WRITER {
                let id = w * PER_WRITER + i;
                map.put(Key::from_u64(id), Arc::new(id));
            }
        }));
    }

    for _ in 0..READERS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut seen = HashSet::new();
            map.each(|k, _| {
                assert!(seen.insert(*k), "each() visited {:?} twice in one run", k);
                false
            });
            let max_possible = WRITERS * PER_WRITER;
            for k in &seen {
                assert!(key_as_u64(k) < max_possible);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(map.size() as u64, WRITERS * PER_WRITER);
}

#[test]
fn to_map_snapshot_matches_size() {
    let map = Map::new();
    for i in 0..100u64 {
        map.put(Key::from_u64(i), Arc::new(i * 2));
    }
    let snapshot = map.to_map();
    assert_eq!(snapshot.len() as i64, map.size());
    for (k, v) in snapshot {
        assert_eq!(*v, key_as_u64(&k) * 2);
    }
}
