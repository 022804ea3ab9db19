use crate::{
    builder::Config,
    common::hash::{self, HashValue},
    map::{Item, OpKind, Outcome, ViewEntry},
    store::{table_core::Located, PlainFreeze, Record, TableCore},
};

/// A lock-free hash table.
///
/// Every write is a single compare-and-swap on a bucket head. A thread that
/// loses a race retries against the new head; a thread that runs into a
/// migration helps finish it and retries in the new store. Some thread always
/// makes progress, but an individual thread may in principle retry forever.
/// [`WaitFreeTable`](crate::WaitFreeTable) bounds that.
///
/// Views are assembled bucket by bucket and may mix writes that happened
/// while the view was taken.
///
/// # Example
///
/// ```rust
/// use hatrack::{ConcurrentMap, HashValue, LockFreeTable};
///
/// let table = LockFreeTable::new();
/// let hv = HashValue::new(0, 42);
///
/// assert_eq!(table.put(hv, "a"), None);
/// assert_eq!(table.put(hv, "b"), Some("a"));
/// assert_eq!(table.get(hv), Some("b"));
/// assert_eq!(table.remove(hv), Some("b"));
/// assert!(table.is_empty());
/// ```
pub struct LockFreeTable<T> {
    core: TableCore<T>,
}

impl<T: Item> LockFreeTable<T> {
    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: TableCore::new(config),
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
                    store = self.core.migrate(store, &guard, &PlainFreeze);
                    continue;
                }
            };

            match self.core.swap_head(bucket, kind, record, &guard) {
                Ok(outcome) => return outcome,
                Err(returned) => {
                    record = returned;
                    store = self.core.migrate(store, &guard, &PlainFreeze);
                }
            }
        }
    }

    fn read(&self, hv: HashValue) -> Option<T> {
        self.core.read(hv)
    }

    fn entries(&self, sort: bool) -> Vec<ViewEntry<T>> {
        self.core.entries(sort)
    }
}

super::impl_table!(LockFreeTable);
