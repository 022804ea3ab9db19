use parking_lot::Mutex;

use crate::{
    builder::Config,
    common::hash::{self, HashValue},
    map::{Item, OpKind, Outcome, ViewEntry},
    store::{table_core::Located, PlainFreeze, Record, TableCore},
};

/// A hash table whose writers serialize on a single mutex.
///
/// Readers never take the lock. Migrations run while the writer that triggered
/// them still holds it, so at most one migration is ever in progress.
pub struct GlobalLockTable<T> {
    core: TableCore<T>,
    write_lock: Mutex<()>,
}

impl<T: Item> GlobalLockTable<T> {
    pub(crate) fn with_config(config: Config) -> Self {
        Self {
            core: TableCore::new(config),
            write_lock: Mutex::new(()),
        }
    }

    fn execute(&self, hv: HashValue, kind: OpKind, item: Option<T>) -> Outcome<T> {
        hash::check(hv);

        let _lock = self.write_lock.lock();
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

            // With the lock held, only a migration we triggered ourselves can
            // have frozen the bucket.
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

super::impl_table!(GlobalLockTable);

#[cfg(test)]
mod tests {
    use super::GlobalLockTable;

    crate::map::test_util::table_test_suite!(GlobalLockTable);
}
