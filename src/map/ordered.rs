use crate::{
    builder::Config,
    common::hash::{self, HashValue},
    map::{Item, OpKind, Outcome, ViewEntry},
    mmm::Guard,
    store::{table_core::Located, Bucket, Freeze, Head, Record, TableCore},
};

/// A lock-free hash table with linearizable, insertion-ordered views.
///
/// Every write is committed with an epoch taken from the table's reclamation
/// domain, and each bucket keeps the records it superseded until no reader can
/// need them. A view picks one epoch and reports, for every bucket, the newest
/// record committed no later than that epoch. The result is exactly the
/// table's contents at that instant.
///
/// Overwrites keep the epoch of the original insertion, so sorted views list
/// items in the order their keys were first inserted.
///
/// # Example
///
/// ```rust
/// use hatrack::{ConcurrentMap, HashValue, OrderedTable};
///
/// let table = OrderedTable::new();
/// for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
///     table.put(HashValue::new(7, 100 - i as u64), name);
/// }
/// table.put(HashValue::new(7, 100), "A");
///
/// assert_eq!(table.view(true), vec!["A", "b", "c"]);
/// ```
pub struct OrderedTable<T> {
    core: TableCore<T>,
}

impl<T: Item> OrderedTable<T> {
    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: TableCore::new(config),
        }
    }

    fn commit(&self, record: &Record<T>) -> u64 {
        record.commit_with(|| self.core.domain().advance())
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
                    store = self.core.migrate(store, &guard, self);
                    continue;
                }
            };

            let head = bucket.head.load();
            if head.is_moving() {
                store = self.core.migrate(store, &guard, self);
                continue;
            }

            // A record is only ever built on top of a committed one, so every
            // history chain is ordered by write epoch.
            let old = head.record(&guard);
            if let Some(old) = old {
                self.commit(old);
            }

            let previous = old.and_then(|r| r.item.clone());
            if !kind.writes(previous.is_some()) {
                return Outcome::skipped(previous);
            }

            record.next = head.as_ptr();
            record.create_epoch = match old {
                Some(old) if !old.is_tombstone() => old.sort_epoch(),
                _ => 0,
            };
            let live_after = !record.is_tombstone();
            let candidate = Box::into_raw(record);

            match bucket.head.compare_exchange(head, candidate) {
                Ok(()) => {
                    self.commit(unsafe { &*candidate });
                    self.core
                        .add_items(live_after as i64 - previous.is_some() as i64);
                    // Retired only after the successor is committed, so views
                    // older than that commit can still walk to it.
                    if !head.is_null() {
                        unsafe { self.core.retire_record(head.as_ptr()) };
                    }
                    return Outcome::written(previous);
                }
                Err(_) => record = unsafe { Box::from_raw(candidate) },
            }
        }
    }

    fn read(&self, hv: HashValue) -> Option<T> {
        let guard = self.core.domain().pin();
        let store = self.core.current(&guard);
        let bucket = store.find(hv)?;
        let record = bucket.head.load().record(&guard)?;
        self.commit(record);
        record.item.clone()
    }

    fn entries(&self, sort: bool) -> Vec<ViewEntry<T>> {
        let (guard, epoch) = self.core.domain().pin_linearized();
        let store = self.core.current(&guard);

        let mut entries = store
            .buckets
            .iter()
            .filter_map(|bucket| {
                let record = self.record_at(bucket, epoch, &guard)?;
                let item = record.item.clone()?;
                Some(ViewEntry {
                    hv: bucket.hash(),
                    item,
                    epoch: record.sort_epoch(),
                })
            })
            .collect::<Vec<_>>();

        if sort {
            entries.sort_unstable_by_key(|entry| entry.epoch);
        }
        entries
    }

    /// The newest record of `bucket` committed at or before `epoch`.
    fn record_at<'g>(
        &self,
        bucket: &Bucket<T>,
        epoch: u64,
        guard: &'g Guard<'_>,
    ) -> Option<&'g Record<T>> {
        let mut record = bucket.head.load().record(guard)?;
        self.commit(record);

        while record.write_epoch() > epoch {
            record = record.previous(guard)?;
        }
        Some(record)
    }
}

impl<T: Item> Freeze<T, ()> for OrderedTable<T> {
    fn freeze(&self, bucket: &Bucket<T>, guard: &Guard<'_>) -> Head<T> {
        let head = bucket.head.freeze();
        if let Some(record) = head.record(guard) {
            self.commit(record);
        }
        head
    }

    fn horizon(&self) -> u64 {
        self.core.domain().oldest_reservation()
    }

    /// Tombstones that a pinned view may still have to look behind move along
    /// with the live records.
    fn forward(&self, record: &Record<T>, horizon: u64) -> bool {
        !record.is_tombstone() || record.write_epoch() >= horizon
    }
}

super::impl_table!(OrderedTable);

#[cfg(test)]
mod tests {
    use super::OrderedTable;
    use crate::{ConcurrentMap, HashValue};

    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    crate::map::test_util::table_test_suite!(OrderedTable);

    #[test]
    fn views_follow_first_insertion() {
        let table = OrderedTable::new();
        for i in 1..=20_u64 {
            table.put(HashValue::new(0, 21 - i), i);
        }
        table.put(HashValue::new(0, 20), 100);
        table.remove(HashValue::new(0, 19));

        let view = table.view(true);
        let mut expected = vec![100];
        expected.extend(3..=20);
        assert_eq!(view, expected);
    }

    #[test]
    fn view_is_a_prefix_of_a_sequential_writer() {
        const KEYS: u64 = 2_000;

        let table = Arc::new(OrderedTable::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let table = Arc::clone(&table);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for i in 1..=KEYS {
                    table.put(HashValue::new(3, i), i);
                }
                done.store(true, Ordering::Release);
            })
        };

        loop {
            let finished = done.load(Ordering::Acquire);
            let view = table.view(true);
            // Key i is only ever written after key i - 1.
            for (position, item) in view.iter().enumerate() {
                assert_eq!(*item, position as u64 + 1);
            }
            if finished {
                assert_eq!(view.len() as u64, KEYS);
                break;
            }
        }

        writer.join().unwrap();
    }

    #[test]
    fn view_survives_concurrent_removals() {
        // Removing keys in insertion order must never leave a view with a hole
        // in front of a key that was removed later.
        const KEYS: u64 = 500;

        let table = Arc::new(OrderedTable::new());
        for i in 1..=KEYS {
            table.put(HashValue::new(5, i), i);
        }

        let remover = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for i in 1..=KEYS {
                    assert_eq!(table.remove(HashValue::new(5, i)), Some(i));
                }
            })
        };

        while !table.is_empty() {
            let view = table.view(true);
            if let Some(first) = view.first() {
                let expected = (*first..=KEYS).collect::<Vec<_>>();
                assert_eq!(view, expected);
            }
        }

        remover.join().unwrap();
        assert!(table.view(false).is_empty());
    }
}
