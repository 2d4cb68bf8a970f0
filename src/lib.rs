//! A lock-free, concurrently resizable hash map keyed by 16-byte
//! identifiers, implementing Shalev & Shavit's (2006) split-ordered list.
//!
//! Every entry ever inserted lives in one strictly sorted linked list
//! ([`list`]); a lazily-growing two-level [`directory`] of shortcut
//! references lets a lookup skip straight to the right neighborhood of
//! that list instead of walking from the front. Growth never rehashes or
//! relocates a single entry — the directory only ever gets bigger.
//!
//! Reads ([`Map::get`]) are wait-free modulo bucket materialization, which
//! is itself lock-free. Writes ([`Map::put`] and friends) are lock-free:
//! some thread always makes progress, but no individual thread is
//! guaranteed to finish in bounded steps under contention.
//!
//! Deletion is out of scope: this core only implements insert, lookup, and
//! iteration, which is what lets it skip a memory-reclamation scheme
//! entirely (nodes are never freed while the map is live).
//!
//! ```
//! use split_ordered_map::{Key, Map};
//! use std::sync::Arc;
//!
//! let map = Map::new();
//! map.put(Key::from_u64(1), Arc::new("one"));
//! assert_eq!(map.get(&Key::from_u64(1)).as_deref(), Some(&"one"));
//! assert_eq!(map.size(), 1);
//! ```
mod directory;
mod error;
mod hash;
mod key;
mod list;
mod scratch;
mod value;

pub use hash::Map;
pub use key::Key;
pub use scratch::Scratch;
