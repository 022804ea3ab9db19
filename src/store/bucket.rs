use std::{
    ptr,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use portable_atomic::AtomicU128;

#[cfg(feature = "unstable-debug-counters")]
use crate::common::debug_counters::InternalGlobalDebugCounters as Counters;

use super::record::RecordPtr;
use crate::common::{
    constants::{threshold_for, MIN_SIZE_LOG},
    hash::HashValue,
};

pub(crate) struct Bucket<T, L = ()> {
    hv: AtomicU128,
    pub(crate) head: RecordPtr<T>,
    /// Per-bucket lock. `()` for every table except the bucket-lock one.
    pub(crate) lock: L,
}

impl<T, L: Default> Default for Bucket<T, L> {
    fn default() -> Self {
        Self {
            hv: AtomicU128::new(0),
            head: RecordPtr::default(),
            lock: L::default(),
        }
    }
}

impl<T, L> Bucket<T, L> {
    pub(crate) fn hash(&self) -> HashValue {
        HashValue::from_bits(self.hv.load(Ordering::Acquire))
    }

    /// Tries to reserve an unused bucket for `hv`. Returns the hash the bucket
    /// ends up holding.
    fn reserve(&self, hv: HashValue) -> Result<(), HashValue> {
        self.hv
            .compare_exchange(0, hv.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(HashValue::from_bits)
    }
}

/// One generation of a table: a fixed, power-of-two sized array of buckets.
pub(crate) struct Store<T, L = ()> {
    pub(crate) buckets: Box<[Bucket<T, L>]>,
    size_log: u8,
    last_slot: usize,
    threshold: usize,
    used_count: AtomicUsize,
    next: AtomicPtr<Store<T, L>>,
    generation: u64,
    /// Tombstones committed at or after this epoch are carried into this
    /// store by the ordered table's migration.
    pub(crate) horizon: u64,
}

impl<T, L: Default> Store<T, L> {
    pub(crate) fn with_size_log(generation: u64, size_log: u8) -> Self {
        assert!((size_log as u32) < usize::BITS);

        let length = 1_usize << size_log;
        let buckets = (0..length).map(|_| Bucket::default()).collect::<Box<[_]>>();

        #[cfg(feature = "unstable-debug-counters")]
        {
            let size = (buckets.len() * std::mem::size_of::<Bucket<T, L>>()) as u64;
            Counters::store_created(size);
        }

        Self {
            buckets,
            size_log,
            last_slot: length - 1,
            threshold: threshold_for(length),
            used_count: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
            generation,
            horizon: u64::MAX,
        }
    }
}

#[cfg(feature = "unstable-debug-counters")]
impl<T, L> Drop for Store<T, L> {
    fn drop(&mut self) {
        let size = (self.buckets.len() * std::mem::size_of::<Bucket<T, L>>()) as u64;
        Counters::store_dropped(size);
    }
}

impl<T, L> Store<T, L> {
    pub(crate) fn size_log(&self) -> u8 {
        self.size_log
    }

    #[cfg(any(test, feature = "logging"))]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn used_count(&self) -> usize {
        self.used_count.load(Ordering::Acquire)
    }

    /// Buckets in probe order for `hv`: from its home slot, wrapping around
    /// once.
    pub(crate) fn probe(&self, hv: HashValue) -> impl Iterator<Item = &Bucket<T, L>> + '_ {
        let start = hv.index(self.last_slot);
        (0..=self.last_slot).map(move |i| &self.buckets[(start + i) & self.last_slot])
    }

    /// Finds the bucket already reserved for `hv`, if any.
    pub(crate) fn find(&self, hv: HashValue) -> Option<&Bucket<T, L>> {
        for bucket in self.probe(hv) {
            let stored = bucket.hash();
            if stored == hv {
                return Some(bucket);
            }
            if stored.is_zero() {
                return None;
            }
        }

        None
    }

    /// Finds or reserves the bucket for `hv`.
    ///
    /// Returns `None` when the store must be migrated first: the probe found
    /// no room, or reserving a fresh bucket pushed the store to its threshold.
    pub(crate) fn claim(&self, hv: HashValue) -> Option<&Bucket<T, L>> {
        for bucket in self.probe(hv) {
            match bucket.reserve(hv) {
                Ok(()) => {
                    let used = self.used_count.fetch_add(1, Ordering::AcqRel) + 1;
                    return if used >= self.threshold {
                        None
                    } else {
                        Some(bucket)
                    };
                }
                Err(stored) if stored == hv => return Some(bucket),
                Err(_) => continue,
            }
        }

        None
    }

    /// Reserves the bucket for `hv` while copying into this (unpublished)
    /// store. The store is sized so that every forwarded record fits.
    pub(crate) fn claim_for_copy(&self, hv: HashValue) -> &Bucket<T, L> {
        for bucket in self.probe(hv) {
            match bucket.reserve(hv) {
                Ok(()) => return bucket,
                Err(stored) if stored == hv => return bucket,
                Err(_) => continue,
            }
        }

        panic!(
            "store generation {} has no room left for a migrated record",
            self.generation
        );
    }

    /// Sets the used count of a freshly copied store. Every migrating thread
    /// computes the same value, so only the first store matters.
    pub(crate) fn init_used_count(&self, count: usize) {
        let _ = self
            .used_count
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Relaxed);
    }

    pub(crate) fn next_ptr(&self) -> *mut Store<T, L> {
        self.next.load(Ordering::Acquire)
    }

    /// Installs `candidate` as the next store unless another thread already
    /// did, and returns whichever store won. `candidate` is only called when
    /// no next store exists yet.
    pub(crate) fn next_or_install(
        &self,
        candidate: impl FnOnce() -> Store<T, L>,
    ) -> &Store<T, L> {
        let next = self.next_ptr();
        if let Some(next) = unsafe { next.as_ref() } {
            return next;
        }

        let new_next = Box::into_raw(Box::new(candidate()));

        match self.next.compare_exchange(
            ptr::null_mut(),
            new_next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => unsafe { &*new_next },
            Err(winner) => {
                unsafe { drop(Box::from_raw(new_next)) };
                unsafe { &*winner }
            }
        }
    }

    /// Frees every record this store still owns: each non-empty head that was
    /// not forwarded to a successor.
    ///
    /// # Safety
    ///
    /// No other thread may be able to reach this store.
    pub(crate) unsafe fn release_records(&mut self) -> usize {
        let mut freed = 0;

        for bucket in self.buckets.iter_mut() {
            let head = bucket.head.take();
            if head.is_forwarded() || head.is_null() {
                continue;
            }
            drop(Box::from_raw(head.as_ptr()));
            freed += 1;
        }

        freed
    }
}

/// The size the next store gets, given how many records it receives.
pub(crate) fn next_size_log(size_log: u8, forwarded: usize) -> u8 {
    let length = 1_usize << size_log;

    if forwarded >= length / 2 {
        size_log + 1
    } else if forwarded <= length / 4 && size_log > MIN_SIZE_LOG {
        size_log - 1
    } else {
        size_log
    }
}

#[cfg(test)]
mod tests {
    use super::{next_size_log, Store};
    use crate::common::hash::HashValue;

    #[test]
    fn claim_reserves_once_per_hash() {
        let store = Store::<u32>::with_size_log(0, 4);
        let hv = HashValue::new(1, 3);

        let a = store.claim(hv).unwrap() as *const _;
        let b = store.claim(hv).unwrap() as *const _;
        assert_eq!(a, b);
        assert_eq!(store.used_count(), 1);
        assert_eq!(store.find(hv).unwrap().hash(), hv);
        assert!(store.find(HashValue::new(2, 3)).is_none());
    }

    #[test]
    fn collisions_probe_linearly() {
        let store = Store::<u32>::with_size_log(0, 4);
        let first = HashValue::new(1, 15);
        let second = HashValue::new(2, 15);

        store.claim(first).unwrap();
        store.claim(second).unwrap();

        assert!(std::ptr::eq(store.find(first).unwrap(), &store.buckets[15]));
        assert!(std::ptr::eq(store.find(second).unwrap(), &store.buckets[0]));
    }

    #[test]
    fn claim_at_threshold_asks_for_migration() {
        let store = Store::<u32>::with_size_log(0, 4);
        // 16 buckets, threshold 12.
        for w2 in 1..12 {
            assert!(store.claim(HashValue::new(0, w2)).is_some());
        }
        assert!(store.claim(HashValue::new(0, 12)).is_none());
        assert_eq!(store.used_count(), 12);
    }

    #[test]
    fn only_the_first_next_store_is_kept() {
        let store = Store::<u32>::with_size_log(0, 4);
        let first = store.next_or_install(|| Store::with_size_log(1, 5)) as *const _;
        let second = store.next_or_install(|| unreachable!()) as *const _;
        assert_eq!(first, second);
        assert_eq!(store.generation(), 0);

        unsafe { drop(Box::from_raw(store.next_ptr())) };
    }

    #[test]
    fn next_size_follows_load() {
        assert_eq!(next_size_log(4, 8), 5);
        assert_eq!(next_size_log(4, 0), 4);
        assert_eq!(next_size_log(6, 16), 5);
        assert_eq!(next_size_log(6, 20), 6);
    }
}
