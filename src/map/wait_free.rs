use crate::{
    builder::Config,
    common::hash::{self, HashValue},
    help::{self, Descriptor, HelpManager},
    map::{Item, OpKind, Outcome, ViewEntry},
    mmm::Guard,
    store::{table_core::Located, Bucket, Freeze, Head, Record, TableCore},
};

/// A wait-free hash table.
///
/// Writes start out like those of [`LockFreeTable`](crate::LockFreeTable),
/// but give up after [`help_threshold`](crate::TableBuilder::help_threshold)
/// lost CAS races and hand the operation to the table's help manager. Every
/// operation first helps announced operations to completion, so a thread that
/// asked for help finishes within a bounded number of steps of the threads
/// that kept beating it.
pub struct WaitFreeTable<T> {
    core: TableCore<T>,
    help: HelpManager<T>,
}

impl<T: Item> WaitFreeTable<T> {
    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: TableCore::new(config),
            help: HelpManager::new(),
        }
    }

    fn execute(&self, hv: HashValue, kind: OpKind, item: Option<T>) -> Outcome<T> {
        hash::check(hv);

        let guard = self.core.domain().pin();
        self.help_announced(&guard);

        let record = Box::new(Record::new(item));
        match self.fast_path(hv, kind, record, &guard) {
            Ok(outcome) => outcome,
            Err(mut record) => self.slow_path(hv, kind, record.item.take(), &guard),
        }
    }

    /// Tries the operation with plain CAS writes. Hands the record back once
    /// the help threshold is reached.
    fn fast_path(
        &self,
        hv: HashValue,
        kind: OpKind,
        mut record: Box<Record<T>>,
        guard: &Guard<'_>,
    ) -> Result<Outcome<T>, Box<Record<T>>> {
        let mut store = self.core.current(guard);
        let mut failures = 0;

        while failures < self.core.config().help_threshold {
            let bucket = match self.core.locate(store, hv, kind) {
                Located::Bucket(bucket) => bucket,
                Located::Absent => return Ok(Outcome::absent()),
                Located::Migrate => {
                    store = self.core.migrate(store, guard, self);
                    continue;
                }
            };

            let head = bucket.head.load();
            if head.is_moving() {
                store = self.core.migrate(store, guard, self);
                continue;
            }

            let old = head.record(guard);
            if let Some(old) = old {
                self.settle(old);
            }

            let previous = old.and_then(|r| r.item.clone());
            if !kind.writes(previous.is_some()) {
                return Ok(Outcome::skipped(previous));
            }

            record.create_epoch = match old {
                Some(old) if !old.is_tombstone() => old.sort_epoch(),
                _ => self.core.new_epoch(),
            };
            let live_after = !record.is_tombstone();
            let candidate = Box::into_raw(record);

            match bucket.head.compare_exchange(head, candidate) {
                Ok(()) => {
                    self.core
                        .add_items(live_after as i64 - previous.is_some() as i64);
                    if !head.is_null() {
                        unsafe { self.core.retire_record(head.as_ptr()) };
                    }
                    return Ok(Outcome::written(previous));
                }
                Err(_) => {
                    record = unsafe { Box::from_raw(candidate) };
                    failures += 1;
                }
            }
        }

        Err(record)
    }

    fn slow_path(
        &self,
        hv: HashValue,
        kind: OpKind,
        item: Option<T>,
        guard: &Guard<'_>,
    ) -> Outcome<T> {
        #[cfg(feature = "logging")]
        log::trace!("{kind:?} on {hv:?} asks for help");

        let desc = Box::into_raw(Box::new(Descriptor::new(kind, hv, item)));
        self.help.announce(desc);
        self.help_announced(guard);

        // No-op when a helper already completed it.
        let record = self.drive(desc, guard);
        record.release_owner(desc);

        let previous = record.displaced.clone();
        let outcome = if kind.writes(previous.is_some()) {
            Outcome::written(previous)
        } else {
            Outcome::skipped(previous)
        };

        self.help.withdraw();
        self.core.domain().retire(unsafe { Box::from_raw(desc) });

        outcome
    }

    fn help_announced(&self, guard: &Guard<'_>) {
        if !self.help.has_pending() {
            return;
        }

        for desc in self.help.announced(guard) {
            self.drive(desc, guard);
        }
    }

    /// Runs `desc` to completion and returns the record installed for it.
    fn drive<'g>(&self, desc_ptr: *mut Descriptor<T>, guard: &'g Guard<'_>) -> &'g Record<T> {
        let desc = unsafe { &*desc_ptr };
        let mut store = self.core.current(guard);

        loop {
            if let Some(record) = desc.installed(guard) {
                return record;
            }

            // Even operations that turn out to be no-ops install a record, so
            // they need a bucket.
            let Some(bucket) = store.claim(desc.hv) else {
                store = self.core.migrate(store, guard, self);
                continue;
            };

            let head = bucket.head.load();
            if head.is_moving() {
                store = self.core.migrate(store, guard, self);
                continue;
            }

            let old = head.record(guard);
            if let Some(old) = old {
                if old.owner() == desc_ptr {
                    help::finish(&self.core, desc, old);
                    continue;
                }
                self.settle(old);
            }

            if desc.installed(guard).is_some() {
                continue;
            }

            self.install(bucket, head, old, desc_ptr);
        }
    }

    /// Offers one record for `desc` in `bucket`, built from the observed head.
    fn install(
        &self,
        bucket: &Bucket<T>,
        head: Head<T>,
        old: Option<&Record<T>>,
        desc_ptr: *mut Descriptor<T>,
    ) {
        let desc = unsafe { &*desc_ptr };
        let displaced = old.and_then(|r| r.item.clone());
        let item = if desc.kind.writes(displaced.is_some()) {
            desc.item.clone()
        } else {
            displaced.clone()
        };

        let mut record = Record::owned_by(item, desc_ptr, displaced);
        record.create_epoch = match old {
            Some(old) if !old.is_tombstone() && !record.is_tombstone() => old.sort_epoch(),
            _ => self.core.new_epoch(),
        };
        let candidate = Box::into_raw(Box::new(record));

        match bucket.head.compare_exchange(head, candidate) {
            Ok(()) => {
                help::finish(&self.core, desc, unsafe { &*candidate });
                if !head.is_null() {
                    unsafe { self.core.retire_record(head.as_ptr()) };
                }
            }
            Err(_) => unsafe { drop(Box::from_raw(candidate)) },
        }
    }

    /// Completes the descriptor that owns `record`, if it is still pending.
    fn settle(&self, record: &Record<T>) {
        let owner = record.owner();
        if let Some(desc) = unsafe { owner.as_ref() } {
            help::finish(&self.core, desc, record);
        }
    }

    fn read(&self, hv: HashValue) -> Option<T> {
        self.core.read(hv)
    }

    fn entries(&self, sort: bool) -> Vec<ViewEntry<T>> {
        self.core.entries(sort)
    }
}

impl<T: Item> Freeze<T, ()> for WaitFreeTable<T> {
    fn freeze(&self, bucket: &Bucket<T>, guard: &Guard<'_>) -> Head<T> {
        let head = bucket.head.freeze();
        if let Some(record) = head.record(guard) {
            self.settle(record);
        }
        head
    }
}

super::impl_table!(WaitFreeTable);

#[cfg(test)]
mod tests {
    use super::WaitFreeTable;
    use crate::{map::OpKind, ConcurrentMap, HashValue};

    use std::sync::{Arc, Barrier};

    crate::map::test_util::table_test_suite!(WaitFreeTable);

    fn always_helped() -> WaitFreeTable<u64> {
        WaitFreeTable::builder().help_threshold(1).build()
    }

    #[test]
    fn slow_path_matches_fast_path() {
        let table = always_helped();
        let hv = HashValue::new(0, 1);

        let guard = table.core.domain().pin();
        let put = table.slow_path(hv, OpKind::Put, Some(1), &guard);
        drop(guard);
        assert!(put.written && put.previous.is_none());
        assert_eq!(table.get(hv), Some(1));
        assert_eq!(table.len(), 1);

        let guard = table.core.domain().pin();
        let add = table.slow_path(hv, OpKind::Add, Some(2), &guard);
        assert!(!add.written);
        assert_eq!(add.previous, Some(1));

        let replace = table.slow_path(hv, OpKind::Replace, Some(3), &guard);
        assert!(replace.written);
        assert_eq!(replace.previous, Some(1));

        let remove = table.slow_path(hv, OpKind::Remove, None, &guard);
        assert_eq!(remove.previous, Some(3));

        let missing = table.slow_path(hv, OpKind::Remove, None, &guard);
        assert!(!missing.written && missing.previous.is_none());
        drop(guard);

        assert_eq!(table.get(hv), None);
        assert_eq!(table.len(), 0);
        assert!(!table.help.has_pending());
    }

    #[test]
    fn contended_counter_keys_with_forced_help() {
        const THREADS: u64 = 8;
        const KEYS: u64 = 64;

        let table = Arc::new(always_helped());
        let barrier = Arc::new(Barrier::new(THREADS as usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut added = 0;
                    for k in 1..=KEYS {
                        if table.add(HashValue::new(0, k), t) {
                            added += 1;
                        }
                        table.put(HashValue::new(1, k), t);
                    }
                    added
                })
            })
            .collect();

        let added: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Each key is added by exactly one thread.
        assert_eq!(added, KEYS);
        assert_eq!(table.len(), 2 * KEYS);
        for k in 1..=KEYS {
            assert!(table.get(HashValue::new(0, k)).unwrap() < THREADS);
            assert!(table.get(HashValue::new(1, k)).unwrap() < THREADS);
        }
        assert!(!table.help.has_pending());
    }
}
