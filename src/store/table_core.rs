use std::{
    mem,
    sync::{
        atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

use super::{Bucket, Record, Store};
use crate::{
    builder::Config,
    common::hash::HashValue,
    map::{Item, OpKind, Outcome, ViewEntry},
    mmm::{Domain, Guard},
};

/// State every table variant shares: the current store, the item counter, the
/// insertion clock and the reclamation domain.
pub(crate) struct TableCore<T, L = ()> {
    store: AtomicPtr<Store<T, L>>,
    item_count: CachePadded<AtomicI64>,
    next_epoch: CachePadded<AtomicU64>,
    domain: Arc<Domain>,
    config: Config,
}

pub(crate) enum Located<'g, T, L> {
    Bucket(&'g Bucket<T, L>),
    Absent,
    Migrate,
}

impl<T, L> TableCore<T, L>
where
    T: Item,
    L: Default + Send + Sync + 'static,
{
    pub(crate) fn new(config: Config) -> Self {
        let domain = match &config.domain {
            Some(domain) => Arc::clone(domain),
            None => Arc::new(Domain::with_retire_frequency(config.retire_frequency)),
        };
        let store = Box::new(Store::with_size_log(0, config.size_log));

        Self {
            store: AtomicPtr::new(Box::into_raw(store)),
            item_count: CachePadded::new(AtomicI64::new(0)),
            next_epoch: CachePadded::new(AtomicU64::new(0)),
            domain,
            config,
        }
    }

    pub(crate) fn domain(&self) -> &Domain {
        &self.domain
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The current store. Stores are retired through the domain, so the
    /// reference stays valid while `guard` is held.
    pub(crate) fn current<'g>(&self, _guard: &'g Guard<'_>) -> &'g Store<T, L> {
        unsafe { &*self.store.load(Ordering::Acquire) }
    }

    pub(crate) fn swing(&self, from: &Store<T, L>, to: &Store<T, L>) -> bool {
        let from = from as *const Store<T, L> as *mut Store<T, L>;
        let to = to as *const Store<T, L> as *mut Store<T, L>;

        self.store
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hands out insertion epochs for tables whose writes are not committed
    /// through the domain.
    pub(crate) fn new_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_items(&self, delta: i64) {
        if delta != 0 {
            self.item_count.fetch_add(delta, Ordering::AcqRel);
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.item_count.load(Ordering::Acquire).max(0) as u64
    }

    /// Finds the bucket an operation of `kind` works on. Only operations that
    /// can create an item reserve a fresh bucket.
    pub(crate) fn locate<'g>(
        &self,
        store: &'g Store<T, L>,
        hv: HashValue,
        kind: OpKind,
    ) -> Located<'g, T, L> {
        if kind.claims() {
            match store.claim(hv) {
                Some(bucket) => Located::Bucket(bucket),
                None => Located::Migrate,
            }
        } else {
            match store.find(hv) {
                Some(bucket) => Located::Bucket(bucket),
                None => Located::Absent,
            }
        }
    }

    /// Applies `kind` to `bucket` by swapping in `record` with a CAS on the
    /// head, retrying against the fresh head on contention.
    ///
    /// Hands `record` back when a migration has frozen the bucket.
    pub(crate) fn swap_head(
        &self,
        bucket: &Bucket<T, L>,
        kind: OpKind,
        mut record: Box<Record<T>>,
        guard: &Guard<'_>,
    ) -> Result<Outcome<T>, Box<Record<T>>> {
        loop {
            let head = bucket.head.load();
            if head.is_moving() {
                return Err(record);
            }

            let old = head.record(guard);
            let previous = old.and_then(|r| r.item.clone());
            if !kind.writes(previous.is_some()) {
                return Ok(Outcome::skipped(previous));
            }

            record.create_epoch = match old {
                Some(old) if !old.is_tombstone() => old.sort_epoch(),
                _ => self.new_epoch(),
            };
            let live_after = !record.is_tombstone();
            let candidate = Box::into_raw(record);

            match bucket.head.compare_exchange(head, candidate) {
                Ok(()) => {
                    self.add_items(live_after as i64 - previous.is_some() as i64);
                    if !head.is_null() {
                        unsafe { self.retire_record(head.as_ptr()) };
                    }
                    return Ok(Outcome::written(previous));
                }
                Err(_) => record = unsafe { Box::from_raw(candidate) },
            }
        }
    }

    /// Reads the live item stored under `hv`.
    pub(crate) fn read(&self, hv: HashValue) -> Option<T> {
        let guard = self.domain.pin();
        let store = self.current(&guard);
        let bucket = store.find(hv)?;
        let record = bucket.head.load().record(&guard)?;
        record.item.clone()
    }

    /// Collects the live items of the current store, one bucket at a time.
    pub(crate) fn entries(&self, sort: bool) -> Vec<ViewEntry<T>> {
        let guard = self.domain.pin();
        self.collect_entries(self.current(&guard), &guard, sort)
    }

    pub(crate) fn collect_entries(
        &self,
        store: &Store<T, L>,
        guard: &Guard<'_>,
        sort: bool,
    ) -> Vec<ViewEntry<T>> {
        let mut entries = store
            .buckets
            .iter()
            .filter_map(|bucket| {
                let record = bucket.head.load().record(guard)?;
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

    /// # Safety
    ///
    /// `record` must have just been unlinked from the head that owned it.
    pub(crate) unsafe fn retire_record(&self, record: *mut Record<T>) {
        self.domain.retire(Box::from_raw(record));
    }

    /// Frees every store and record and starts over with an empty store of
    /// the configured size.
    pub(crate) fn reset(&mut self) {
        let fresh = Box::new(Store::with_size_log(0, self.config.size_log));
        let fresh = Box::into_raw(fresh);
        let old = mem::replace(self.store.get_mut(), fresh);
        unsafe {
            let mut old = Box::from_raw(old);
            old.release_records();
        }

        self.item_count.store(0, Ordering::Release);
        self.next_epoch.store(0, Ordering::Release);
        self.domain.collect();
    }
}

impl<T, L> Drop for TableCore<T, L> {
    fn drop(&mut self) {
        unsafe {
            let mut store = Box::from_raw(*self.store.get_mut());
            store.release_records();
        }
    }
}
