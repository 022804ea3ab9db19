//! The table variants and the interface they share.

pub(crate) mod bucket_lock;
pub(crate) mod global_lock;
pub(crate) mod lock_free;
pub(crate) mod ordered;
pub(crate) mod wait_free;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::{
    bucket_lock::BucketLockTable, global_lock::GlobalLockTable, lock_free::LockFreeTable,
    ordered::OrderedTable, wait_free::WaitFreeTable,
};

use crate::common::hash::HashValue;

/// Values a table can store.
///
/// Tables hand out clones of their items, so large values are best stored
/// behind an `Arc`.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Send + Sync + 'static {}

/// One entry of a table view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewEntry<T> {
    pub hv: HashValue,
    pub item: T,
    /// The insertion epoch. Overwrites keep the epoch of the original
    /// insertion.
    pub epoch: u64,
}

/// The operations every table variant supports.
///
/// All operations take `&self` and may be called from any number of threads.
/// Keys are identified solely by their [`HashValue`].
///
/// # Panics
///
/// Every operation panics if given the reserved all-zero hash value.
pub trait ConcurrentMap<T> {
    /// Returns a clone of the item stored under `hv`.
    fn get(&self, hv: HashValue) -> Option<T>;

    /// Stores `item` under `hv`, returning the item it replaced.
    fn put(&self, hv: HashValue, item: T) -> Option<T>;

    /// Stores `item` under `hv` only if an item is already present. Returns
    /// the replaced item, or `None` if nothing was written.
    fn replace(&self, hv: HashValue, item: T) -> Option<T>;

    /// Stores `item` under `hv` only if no item is present. Returns whether
    /// it was written.
    fn add(&self, hv: HashValue, item: T) -> bool;

    /// Removes the item stored under `hv` and returns it.
    fn remove(&self, hv: HashValue) -> Option<T>;

    /// Number of items in the table. Only exact when no writes are in flight.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the items in the table, ordered by insertion epoch when `sort`
    /// is `true`.
    fn view(&self, sort: bool) -> Vec<T> {
        self.view_entries(sort)
            .into_iter()
            .map(|entry| entry.item)
            .collect()
    }

    /// Like [`view`](Self::view), with each item's hash value and insertion
    /// epoch.
    fn view_entries(&self, sort: bool) -> Vec<ViewEntry<T>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpKind {
    Put,
    Replace,
    Add,
    Remove,
}

impl OpKind {
    /// Whether the operation may have to reserve a fresh bucket.
    pub(crate) fn claims(self) -> bool {
        matches!(self, Self::Put | Self::Add)
    }

    /// Whether the operation writes, given whether a live item is present.
    pub(crate) fn writes(self, live: bool) -> bool {
        match self {
            Self::Put => true,
            Self::Replace | Self::Remove => live,
            Self::Add => !live,
        }
    }
}

pub(crate) struct Outcome<T> {
    /// The live item the operation observed.
    pub(crate) previous: Option<T>,
    pub(crate) written: bool,
}

impl<T> Outcome<T> {
    pub(crate) fn absent() -> Self {
        Self {
            previous: None,
            written: false,
        }
    }

    pub(crate) fn skipped(previous: Option<T>) -> Self {
        Self {
            previous,
            written: false,
        }
    }

    pub(crate) fn written(previous: Option<T>) -> Self {
        Self {
            previous,
            written: true,
        }
    }

    /// What a caller gets back for `kind`.
    fn replaced(self, kind: OpKind) -> Option<T> {
        match kind {
            OpKind::Replace | OpKind::Remove if !self.written => None,
            _ => self.previous,
        }
    }
}

/// Implements [`ConcurrentMap`] and the constructors for a table type that
/// provides `execute`, `read` and `entries`, and keeps its shared state in a
/// `core` field.
macro_rules! impl_table {
    ($table:ident) => {
        impl<T: $crate::map::Item> $crate::map::ConcurrentMap<T> for $table<T> {
            fn get(&self, hv: $crate::HashValue) -> Option<T> {
                $crate::common::hash::check(hv);
                self.read(hv)
            }

            fn put(&self, hv: $crate::HashValue, item: T) -> Option<T> {
                let kind = $crate::map::OpKind::Put;
                self.execute(hv, kind, Some(item)).replaced(kind)
            }

            fn replace(&self, hv: $crate::HashValue, item: T) -> Option<T> {
                let kind = $crate::map::OpKind::Replace;
                self.execute(hv, kind, Some(item)).replaced(kind)
            }

            fn add(&self, hv: $crate::HashValue, item: T) -> bool {
                self.execute(hv, $crate::map::OpKind::Add, Some(item))
                    .written
            }

            fn remove(&self, hv: $crate::HashValue) -> Option<T> {
                let kind = $crate::map::OpKind::Remove;
                self.execute(hv, kind, None).replaced(kind)
            }

            fn len(&self) -> u64 {
                self.core.len()
            }

            fn view_entries(&self, sort: bool) -> Vec<$crate::map::ViewEntry<T>> {
                self.entries(sort)
            }
        }

        impl<T: $crate::map::Item> $table<T> {
            /// Creates an empty table with the smallest store size.
            pub fn new() -> Self {
                Self::builder().build()
            }

            /// Creates an empty table whose first store has
            /// `2^size_log` buckets.
            ///
            /// # Panics
            ///
            /// Panics if `size_log` is outside the supported range.
            pub fn new_with_size(size_log: u8) -> Self {
                Self::builder().initial_size_log(size_log).build()
            }

            /// Returns a builder to configure a table of this type.
            pub fn builder() -> $crate::TableBuilder<Self> {
                $crate::TableBuilder::default()
            }

            /// Frees every store and record and resets the table to an empty
            /// store of the configured size.
            pub fn cleanup(&mut self) {
                self.core.reset();
            }

            /// Frees the table and everything in it.
            pub fn delete(self) {
                std::mem::drop(self);
            }
        }

        impl<T: $crate::map::Item> Default for $table<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T: $crate::map::Item> std::fmt::Debug for $table<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($table))
                    .field("len", &self.core.len())
                    .field("config", self.core.config())
                    .finish()
            }
        }
    };
}

pub(crate) use impl_table;
