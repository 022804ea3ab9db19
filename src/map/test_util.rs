use std::sync::{
    atomic::{AtomicIsize, Ordering},
    Arc,
};

use crate::HashValue;


pub(crate) use tests::table_test_suite;

/// A distinct, never-zero hash value per `i`, with `i` selecting the bucket.
pub(crate) fn hv(i: u64) -> HashValue {
    HashValue::new(!i, i)
}

/// An item that keeps count of how many copies of it are alive.
#[derive(Debug)]
pub(crate) struct Tracked {
    pub(crate) value: u64,
    alive: Arc<AtomicIsize>,
}

impl Tracked {
    pub(crate) fn new(value: u64, alive: &Arc<AtomicIsize>) -> Self {
        alive.fetch_add(1, Ordering::SeqCst);
        Self {
            value,
            alive: Arc::clone(alive),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Self::new(self.value, &self.alive)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
