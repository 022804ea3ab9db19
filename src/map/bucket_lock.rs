use std::ptr;

use parking_lot::Mutex;

use crate::{
    builder::Config,
    common::hash::{self, HashValue},
    map::{Item, OpKind, Outcome, ViewEntry},
    mmm::Guard,
    store::{table_core::Located, Bucket, Freeze, Head, Record, Store, TableCore},
};

/// A hash table whose writers lock only the bucket they write.
///
/// Readers never lock. Migrations serialize on a table-wide migration mutex
/// and freeze the store by taking every bucket lock in index order.
///
/// By default, views are assembled bucket by bucket like those of the
/// lock-free tables. With
/// [`consistent_views`](crate::TableBuilder::consistent_views) enabled, a view
/// holds the migration mutex and every bucket lock while it reads, and thus
/// sees the table exactly as it was at one instant.
pub struct BucketLockTable<T> {
    core: TableCore<T, Mutex<()>>,
    migration_lock: Mutex<()>,
}

impl<T: Item> BucketLockTable<T> {
    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: TableCore::new(config),
            migration_lock: Mutex::new(()),
        }
    }

    fn execute(&self, hv: HashValue, kind: OpKind, item: Option<T>) -> Outcome<T> {
        hash::check(hv);

        let guard = self.core.domain().pin();
        let mut store = self.core.current(&guard);
        let mut record = Box::new(Record::new(item));

        loop {
            let bucket = match self.core.locate(store, hv, kind) {
                Located::Bucket(bucket) => bucket,
                Located::Absent => return Outcome::absent(),
                Located::Migrate => {
                    store = self.migrate(store, &guard);
                    continue;
                }
            };

            let attempt = {
                let _lock = bucket.lock.lock();
                self.core.swap_head(bucket, kind, record, &guard)
            };

            match attempt {
                Ok(outcome) => return outcome,
                Err(returned) => {
                    record = returned;
                    store = self.migrate(store, &guard);
                }
            }
        }
    }

    /// Migrates `store` unless another thread already did while this one
    /// waited for the migration lock.
    fn migrate<'g>(
        &self,
        store: &'g Store<T, Mutex<()>>,
        guard: &'g Guard<'_>,
    ) -> &'g Store<T, Mutex<()>> {
        let _lock = self.migration_lock.lock();

        let current = self.core.current(guard);
        if !ptr::eq(current, store) {
            return current;
        }

        self.core.migrate(store, guard, self)
    }

    fn read(&self, hv: HashValue) -> Option<T> {
        self.core.read(hv)
    }

    fn entries(&self, sort: bool) -> Vec<ViewEntry<T>> {
        if !self.core.config().consistent_views {
            return self.core.entries(sort);
        }

        let _migration = self.migration_lock.lock();
        let guard = self.core.domain().pin();
        let store = self.core.current(&guard);
        let _locks = store
            .buckets
            .iter()
            .map(|bucket| bucket.lock.lock())
            .collect::<Vec<_>>();

        self.core.collect_entries(store, &guard, sort)
    }
}

impl<T> Freeze<T, Mutex<()>> for BucketLockTable<T> {
    fn freeze(&self, bucket: &Bucket<T, Mutex<()>>, _guard: &Guard<'_>) -> Head<T> {
        let _lock = bucket.lock.lock();
        bucket.head.freeze()
    }
}

super::impl_table!(BucketLockTable);
