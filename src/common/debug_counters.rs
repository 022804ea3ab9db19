#![cfg(feature = "unstable-debug-counters")]

use crossbeam_utils::atomic::AtomicCell;
use once_cell::sync::Lazy;

#[derive(Clone, Debug)]
pub struct GlobalDebugCounters {
    pub store_creation_count: u64,
    pub store_allocation_bytes: u64,
    pub store_drop_count: u64,
    pub store_release_bytes: u64,
    pub record_creation_count: u64,
    pub record_drop_count: u64,
    pub retire_count: u64,
    pub reclaim_count: u64,
}

impl GlobalDebugCounters {
    pub fn current() -> Self {
        InternalGlobalDebugCounters::current()
    }
}

static COUNTERS: Lazy<InternalGlobalDebugCounters> =
    Lazy::new(InternalGlobalDebugCounters::default);

#[derive(Default)]
pub(crate) struct InternalGlobalDebugCounters {
    store_creation_count: AtomicCell<u64>,
    store_allocation_bytes: AtomicCell<u64>,
    store_drop_count: AtomicCell<u64>,
    store_release_bytes: AtomicCell<u64>,
    record_creation_count: AtomicCell<u64>,
    record_drop_count: AtomicCell<u64>,
    retire_count: AtomicCell<u64>,
    reclaim_count: AtomicCell<u64>,
}

impl InternalGlobalDebugCounters {
    fn current() -> GlobalDebugCounters {
        let c = &COUNTERS;
        GlobalDebugCounters {
            store_creation_count: c.store_creation_count.load(),
            store_allocation_bytes: c.store_allocation_bytes.load(),
            store_drop_count: c.store_drop_count.load(),
            store_release_bytes: c.store_release_bytes.load(),
            record_creation_count: c.record_creation_count.load(),
            record_drop_count: c.record_drop_count.load(),
            retire_count: c.retire_count.load(),
            reclaim_count: c.reclaim_count.load(),
        }
    }

    pub(crate) fn store_created(byte_size: u64) {
        COUNTERS.store_creation_count.fetch_add(1);
        COUNTERS.store_allocation_bytes.fetch_add(byte_size);
    }

    pub(crate) fn store_dropped(byte_size: u64) {
        COUNTERS.store_drop_count.fetch_add(1);
        COUNTERS.store_release_bytes.fetch_add(byte_size);
    }

    pub(crate) fn record_created() {
        COUNTERS.record_creation_count.fetch_add(1);
    }

    pub(crate) fn record_dropped() {
        COUNTERS.record_drop_count.fetch_add(1);
    }

    pub(crate) fn retired() {
        COUNTERS.retire_count.fetch_add(1);
    }

    pub(crate) fn reclaimed(count: u64) {
        COUNTERS.reclaim_count.fetch_add(count);
    }
}
