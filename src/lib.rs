#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Hatrack is a family of interchangeable concurrent hash tables.
//!
//! Every table implements the same [`ConcurrentMap`] interface and differs only
//! in how writers synchronize:
//!
//! | Table               | Writers                           | Views              |
//! |---------------------|-----------------------------------|--------------------|
//! | [`GlobalLockTable`] | serialize on one mutex            | bucket by bucket   |
//! | [`BucketLockTable`] | lock the bucket they write        | optionally locked  |
//! | [`LockFreeTable`]   | CAS, retrying on contention       | bucket by bucket   |
//! | [`WaitFreeTable`]   | CAS, then ask other threads for help | bucket by bucket |
//! | [`OrderedTable`]    | CAS with commit epochs            | linearizable       |
//!
//! Readers never block in any of them.
//!
//! All tables share the same building blocks: an open-addressing bucket store
//! that is migrated to a larger or smaller successor when it fills up, and an
//! epoch-based reclamation [domain](mmm::Domain) that frees superseded stores
//! and records once no thread can still be reading them.
//!
//! Tables do not hash keys. Callers pass a 128-bit [`HashValue`] to every
//! operation, and two keys are the same key exactly when their hash values
//! are equal.
//!
//! # Example
//!
//! ```rust
//! use hatrack::{ConcurrentMap, HashValue, WaitFreeTable};
//!
//! use std::{collections::hash_map::RandomState, sync::Arc, thread};
//!
//! let table = Arc::new(WaitFreeTable::new());
//! let hasher = RandomState::new();
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let table = Arc::clone(&table);
//!         let hasher = hasher.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 let key = format!("{t}-{i}");
//!                 table.put(HashValue::of(&hasher, &key), key);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(table.len(), 400);
//! let hv = HashValue::of(&hasher, "2-42");
//! assert_eq!(table.get(hv).as_deref(), Some("2-42"));
//! ```
//!
//! # Logging
//!
//! With the `logging` feature enabled, migrations are logged at `debug` level
//! and reclamation sweeps and help requests at `trace` level through the
//! [`log`](https://docs.rs/log) crate.

pub(crate) mod builder;
pub(crate) mod common;
pub(crate) mod help;
pub(crate) mod map;
pub mod mmm;
pub(crate) mod store;

pub use builder::TableBuilder;
pub use common::{error::TableError, hash::HashValue};
pub use map::{
    BucketLockTable, ConcurrentMap, GlobalLockTable, Item, LockFreeTable, OrderedTable,
    ViewEntry, WaitFreeTable,
};

#[cfg(feature = "unstable-debug-counters")]
#[cfg_attr(docsrs, doc(cfg(feature = "unstable-debug-counters")))]
pub use common::debug_counters::GlobalDebugCounters;
