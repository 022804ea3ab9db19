//! The help manager behind [`WaitFreeTable`](crate::WaitFreeTable).
//!
//! A write that keeps losing CAS races on its fast path stops retrying on its
//! own. It publishes a [`Descriptor`] of what it wants to do in its thread's
//! announce slot instead, and from then on every operation on the table helps
//! the announced descriptors to completion before doing its own work. Because
//! all threads converge on the same descriptors, the announcing thread is
//! guaranteed to finish once the threads that beat it turn around and help.
//!
//! Helping installs, with one CAS on the bucket head, a record that is owned by
//! the descriptor and remembers the item it displaced. A descriptor is complete
//! once its `installed` pointer is set; the thread that sets it applies the
//! item-count change. A record owned by an incomplete descriptor is never
//! overwritten before that descriptor has been completed.

use std::{
    ptr,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;
use thread_local::ThreadLocal;

use crate::{
    common::hash::HashValue,
    map::{Item, OpKind},
    mmm::Guard,
    store::{Record, TableCore},
};

pub(crate) struct Descriptor<T> {
    pub(crate) kind: OpKind,
    pub(crate) hv: HashValue,
    /// The item to write. `None` for removals.
    pub(crate) item: Option<T>,
    installed: AtomicPtr<Record<T>>,
}

impl<T> Descriptor<T> {
    pub(crate) fn new(kind: OpKind, hv: HashValue, item: Option<T>) -> Self {
        Self {
            kind,
            hv,
            item,
            installed: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The record that completed this descriptor, if any.
    pub(crate) fn installed<'g>(&self, _guard: &'g Guard<'_>) -> Option<&'g Record<T>> {
        unsafe { self.installed.load(Ordering::Acquire).as_ref() }
    }
}

type Slot<T> = CachePadded<AtomicPtr<Descriptor<T>>>;

pub(crate) struct HelpManager<T> {
    slots: ThreadLocal<Slot<T>>,
    pending: CachePadded<AtomicUsize>,
}

impl<T: Item> HelpManager<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: ThreadLocal::new(),
            pending: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    fn slot(&self) -> &Slot<T> {
        self.slots
            .get_or(|| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
    }

    /// Publishes `desc` in the calling thread's slot.
    pub(crate) fn announce(&self, desc: *mut Descriptor<T>) {
        self.slot().store(desc, Ordering::Release);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Empties the calling thread's slot.
    pub(crate) fn withdraw(&self) {
        self.slot().store(ptr::null_mut(), Ordering::Release);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Every descriptor currently announced by any thread.
    ///
    /// Descriptors are retired only after their slot is emptied, so the
    /// pointers stay valid while `guard` is held.
    pub(crate) fn announced<'g>(
        &'g self,
        _guard: &'g Guard<'_>,
    ) -> impl Iterator<Item = *mut Descriptor<T>> + 'g {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|desc| !desc.is_null())
    }
}

/// Completes `desc` with `record`, which was installed on its behalf. Safe to
/// call any number of times from any number of threads.
pub(crate) fn finish<T: Item, L>(
    core: &TableCore<T, L>,
    desc: &Descriptor<T>,
    record: &Record<T>,
)
where
    L: Default + Send + Sync + 'static,
{
    let desc_ptr = desc as *const Descriptor<T> as *mut Descriptor<T>;
    let record_ptr = record as *const Record<T> as *mut Record<T>;

    if desc
        .installed
        .compare_exchange(
            ptr::null_mut(),
            record_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    {
        let delta = record.item.is_some() as i64 - record.displaced.is_some() as i64;
        core.add_items(delta);
    }

    record.release_owner(desc_ptr);
}

#[cfg(test)]
mod tests {
    use super::{finish, Descriptor, HelpManager};
    use crate::{
        builder::Config,
        common::hash::HashValue,
        map::OpKind,
        store::{Record, TableCore},
    };

    #[test]
    fn finish_counts_once() {
        let core = TableCore::<u32>::new(Config::default());
        let guard = core.domain().pin();

        let mut desc = Descriptor::new(OpKind::Put, HashValue::new(0, 1), Some(5));
        let desc_ptr = &mut desc as *mut Descriptor<u32>;
        let record = Record::owned_by(Some(5), desc_ptr, None);
        assert_eq!(record.owner(), desc_ptr);

        finish(&core, &desc, &record);
        finish(&core, &desc, &record);

        assert_eq!(core.len(), 1);
        assert!(record.owner().is_null());
        assert!(std::ptr::eq(desc.installed(&guard).unwrap(), &record));
    }

    #[test]
    fn announced_sees_every_thread() {
        let manager = std::sync::Arc::new(HelpManager::<u32>::new());
        let core = TableCore::<u32>::new(Config::default());
        let guard = core.domain().pin();

        let mut mine = Descriptor::new(OpKind::Remove, HashValue::new(0, 1), None);
        manager.announce(&mut mine);
        assert!(manager.has_pending());

        let other = {
            let manager = std::sync::Arc::clone(&manager);
            std::thread::spawn(move || {
                let desc = Box::into_raw(Box::new(Descriptor::new(
                    OpKind::Add,
                    HashValue::new(0, 2),
                    Some(9),
                )));
                manager.announce(desc);
                desc as usize
            })
            .join()
            .unwrap()
        };

        assert_eq!(manager.announced(&guard).count(), 2);
        manager.withdraw();
        assert_eq!(manager.announced(&guard).count(), 1);

        unsafe { drop(Box::from_raw(other as *mut Descriptor<u32>)) };
    }
}
