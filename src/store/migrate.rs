use std::{ptr, thread};

use super::{bucket::next_size_log, Bucket, Head, Record, Store, TableCore};
use crate::{map::Item, mmm::Guard};

/// The per-table steps of a migration.
pub(crate) trait Freeze<T, L> {
    /// Stops writers from replacing the bucket's head and returns the frozen
    /// head.
    fn freeze(&self, bucket: &Bucket<T, L>, _guard: &Guard<'_>) -> Head<T> {
        bucket.head.freeze()
    }

    /// Computed once per migration, by the thread that sizes the next store.
    fn horizon(&self) -> u64 {
        u64::MAX
    }

    /// Whether a frozen record is carried into the next store.
    fn forward(&self, record: &Record<T>, _horizon: u64) -> bool {
        !record.is_tombstone()
    }
}

/// Migration for tables that need nothing beyond tagging heads.
pub(crate) struct PlainFreeze;

impl<T, L> Freeze<T, L> for PlainFreeze {}

impl<T, L> TableCore<T, L>
where
    T: Item,
    L: Default + Send + Sync + 'static,
{
    /// Moves every live record of `store` into a successor store, publishes
    /// the successor and returns it.
    ///
    /// Any number of threads may run this concurrently on the same store;
    /// they all help with every step and agree on the outcome.
    pub(crate) fn migrate<'g, F>(
        &self,
        store: &'g Store<T, L>,
        guard: &'g Guard<'_>,
        freezer: &F,
    ) -> &'g Store<T, L>
    where
        F: Freeze<T, L>,
    {
        if let Some(backoff) = self.config().migration_backoff {
            if !store.next_ptr().is_null() {
                // Another thread is already migrating; give it a head start.
                thread::sleep(backoff);
                let current = self.current(guard);
                if !ptr::eq(current, store) {
                    return current;
                }
            }
        }

        for bucket in store.buckets.iter() {
            freezer.freeze(bucket, guard);
        }

        let next = store.next_or_install(|| {
            let horizon = freezer.horizon();
            let forwarded = store
                .buckets
                .iter()
                .filter_map(|bucket| bucket.head.load().record(guard))
                .filter(|record| freezer.forward(record, horizon))
                .count();
            let size_log = next_size_log(store.size_log(), forwarded);

            #[cfg(feature = "logging")]
            log::debug!(
                "migrating store generation {} ({} buckets, {} records) to {} buckets",
                store.generation(),
                store.len(),
                forwarded,
                1_usize << size_log
            );

            let mut next = Store::with_size_log(store.generation() + 1, size_log);
            next.horizon = horizon;
            next
        });

        let mut copied = 0;
        for bucket in store.buckets.iter() {
            let head = bucket.head.load();
            if head.is_moved() {
                copied += head.is_forwarded() as usize;
                continue;
            }

            match head.record(guard) {
                Some(record) if freezer.forward(record, next.horizon) => {
                    let target = next.claim_for_copy(bucket.hash());
                    // Fails when another thread copied the record first.
                    let _ = target.head.compare_exchange(Head::empty(), head.as_ptr());
                    bucket.head.mark_moved(true);
                    copied += 1;
                }
                _ => bucket.head.mark_moved(false),
            }
        }
        next.init_used_count(copied);

        if self.swing(store, next) {
            #[cfg(feature = "logging")]
            log::debug!(
                "published store generation {} with {} records",
                next.generation(),
                copied
            );

            let retired = store as *const Store<T, L> as *mut Store<T, L>;
            let old = unsafe { Box::from_raw(retired) };
            guard.domain().retire_with(old, |mut old| unsafe {
                old.release_records();
            });
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        builder::Config,
        common::hash::HashValue,
        map::OpKind,
        store::{PlainFreeze, Record, TableCore},
    };

    fn put(core: &TableCore<u64>, hv: HashValue, item: u64) -> Option<u64> {
        let guard = core.domain().pin();
        let mut store = core.current(&guard);
        let mut record = Box::new(Record::new(Some(item)));
        loop {
            let bucket = match store.claim(hv) {
                Some(bucket) => bucket,
                None => {
                    store = core.migrate(store, &guard, &PlainFreeze);
                    continue;
                }
            };
            match core.swap_head(bucket, OpKind::Put, record, &guard) {
                Ok(outcome) => return outcome.previous,
                Err(r) => {
                    record = r;
                    store = core.migrate(store, &guard, &PlainFreeze);
                }
            }
        }
    }

    #[test]
    fn migration_keeps_live_records_and_grows() {
        let core = TableCore::<u64>::new(Config::default());
        for i in 1..=12 {
            assert_eq!(put(&core, HashValue::new(i, i * 7), i), None);
        }

        let guard = core.domain().pin();
        let store = core.current(&guard);
        assert!(store.generation() > 0);
        assert_eq!(store.len(), 32);
        for i in 1..=12 {
            assert_eq!(core.read(HashValue::new(i, i * 7)), Some(i));
        }
        assert_eq!(core.len(), 12);
    }

    #[test]
    fn migration_drops_tombstones_and_shrinks() {
        let core = TableCore::<u64>::new(Config {
            size_log: 6,
            ..Config::default()
        });

        let guard = core.domain().pin();
        let store = core.current(&guard);
        for i in 1..=3 {
            put(&core, HashValue::new(i, i), i);
        }
        // Tombstone the second record by hand.
        let bucket = store.find(HashValue::new(2, 2)).unwrap();
        let tombstone = Box::new(Record::new(None));
        assert!(core.swap_head(bucket, OpKind::Remove, tombstone, &guard).is_ok());

        let next = core.migrate(store, &guard, &PlainFreeze);
        assert_eq!(next.len(), 32);
        assert_eq!(next.used_count(), 2);
        assert!(next.find(HashValue::new(2, 2)).is_none());
        assert!(std::ptr::eq(core.current(&guard), next));

        // A second migration of the same store is a no-op.
        let again = core.migrate(store, &guard, &PlainFreeze);
        assert!(std::ptr::eq(again, next));
        assert_eq!(core.read(HashValue::new(3, 3)), Some(3));
    }
}
