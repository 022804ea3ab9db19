//! Bucket stores and the machinery shared by every table variant.
//!
//! A table is a pointer to its current [`Store`](bucket::Store), a fixed-size
//! open-addressing array of buckets. Each bucket holds a 128-bit hash value,
//! reserved at most once per store, and a tagged pointer to the current
//! [`Record`](record::Record) for that hash. When a store fills up, threads
//! cooperate to [migrate](table_core::TableCore::migrate) its live records into
//! a successor store and swing the table pointer over to it.

pub(crate) mod bucket;
pub(crate) mod migrate;
pub(crate) mod record;
pub(crate) mod table_core;

pub(crate) use self::{
    bucket::{Bucket, Store},
    migrate::{Freeze, PlainFreeze},
    record::{Head, Record},
    table_core::TableCore,
};
