use std::{
    marker::PhantomData,
    ptr,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
};

use tagptr::{AtomicTagPtr, TagPtr};

#[cfg(feature = "unstable-debug-counters")]
use crate::common::debug_counters::InternalGlobalDebugCounters as Counters;

use crate::{help::Descriptor, mmm::Guard};

/// A migration has claimed the bucket. No writer may replace the head anymore.
const MOVING_TAG: usize = 0b001;
/// The migration is done with the bucket.
const MOVED_TAG: usize = 0b010;
/// The head record was copied into the next store, which now owns it.
const FORWARDED_TAG: usize = 0b100;
const TAG_BITS: usize = 3;

/// One version of the item stored under a hash value.
///
/// A record is written only by the thread that allocates it. Once its pointer
/// has been published into a bucket head, only `write_epoch` (set once, by
/// whichever thread commits it first) and `owner` (cleared once) change.
#[repr(align(8))]
pub(crate) struct Record<T> {
    /// `None` marks a tombstone.
    pub(crate) item: Option<T>,
    /// Epoch of the original insertion, carried over by overwrites. Zero means
    /// "use the write epoch".
    pub(crate) create_epoch: u64,
    write_epoch: AtomicU64,
    /// The record this one superseded. Only maintained by the ordered table.
    pub(crate) next: *mut Record<T>,
    owner: AtomicPtr<Descriptor<T>>,
    /// The live item this record replaced when it was installed on behalf of
    /// a descriptor.
    pub(crate) displaced: Option<T>,
}

unsafe impl<T: Send> Send for Record<T> {}
unsafe impl<T: Sync> Sync for Record<T> {}

impl<T> Record<T> {
    pub(crate) fn new(item: Option<T>) -> Self {
        #[cfg(feature = "unstable-debug-counters")]
        Counters::record_created();

        Self {
            item,
            create_epoch: 0,
            write_epoch: AtomicU64::new(0),
            next: ptr::null_mut(),
            owner: AtomicPtr::new(ptr::null_mut()),
            displaced: None,
        }
    }

    pub(crate) fn owned_by(
        item: Option<T>,
        owner: *mut Descriptor<T>,
        displaced: Option<T>,
    ) -> Self {
        let mut record = Self::new(item);
        *record.owner.get_mut() = owner;
        record.displaced = displaced;
        record
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        self.item.is_none()
    }

    pub(crate) fn write_epoch(&self) -> u64 {
        self.write_epoch.load(Ordering::Acquire)
    }

    /// Stamps the record with `epoch` unless another thread committed it
    /// first. Returns the epoch the record ends up with.
    pub(crate) fn commit_with(&self, epoch: impl FnOnce() -> u64) -> u64 {
        let current = self.write_epoch();
        if current != 0 {
            return current;
        }

        match self
            .write_epoch
            .compare_exchange(0, epoch(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => self.write_epoch(),
            Err(winner) => winner,
        }
    }

    /// The epoch views sort by.
    pub(crate) fn sort_epoch(&self) -> u64 {
        if self.create_epoch != 0 {
            self.create_epoch
        } else {
            self.write_epoch()
        }
    }

    pub(crate) fn owner(&self) -> *mut Descriptor<T> {
        self.owner.load(Ordering::Acquire)
    }

    pub(crate) fn release_owner(&self, owner: *mut Descriptor<T>) {
        let _ = self.owner.compare_exchange(
            owner,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Follows the history link.
    ///
    /// The ordered table only walks past a record whose write epoch is newer
    /// than the walker's linearization epoch, and such a record's predecessor
    /// was retired no earlier than that write epoch.
    pub(crate) fn previous<'g>(&self, _guard: &'g Guard<'_>) -> Option<&'g Record<T>> {
        unsafe { self.next.as_ref() }
    }
}

#[cfg(feature = "unstable-debug-counters")]
impl<T> Drop for Record<T> {
    fn drop(&mut self) {
        Counters::record_dropped();
    }
}

/// A snapshot of a bucket head: a record pointer plus the migration tags.
pub(crate) struct Head<T>(TagPtr<Record<T>, TAG_BITS>);

impl<T> Clone for Head<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Head<T> {}

impl<T> Head<T> {
    pub(crate) fn empty() -> Self {
        Self(TagPtr::null())
    }

    fn tag(self) -> usize {
        self.0.decompose_tag()
    }

    fn with_tag(self, tag: usize) -> Self {
        Self(self.0.set_tag(self.tag() | tag))
    }

    pub(crate) fn as_ptr(self) -> *mut Record<T> {
        self.0.decompose_ptr()
    }

    pub(crate) fn is_null(self) -> bool {
        self.as_ptr().is_null()
    }

    pub(crate) fn is_moving(self) -> bool {
        self.tag() & MOVING_TAG != 0
    }

    pub(crate) fn is_moved(self) -> bool {
        self.tag() & MOVED_TAG != 0
    }

    pub(crate) fn is_forwarded(self) -> bool {
        self.tag() & FORWARDED_TAG != 0
    }

    /// Dereferences the head's record.
    ///
    /// Heads are only loaded from stores reached through the table while
    /// `guard` is held, so the record cannot be reclaimed before the guard is
    /// dropped.
    pub(crate) fn record<'g>(self, _guard: &'g Guard<'_>) -> Option<&'g Record<T>> {
        unsafe { self.as_ptr().as_ref() }
    }
}

/// The atomic, tagged head pointer of a bucket.
pub(crate) struct RecordPtr<T> {
    raw: AtomicTagPtr<Record<T>, TAG_BITS>,
    _marker: PhantomData<Box<Record<T>>>,
}

impl<T> Default for RecordPtr<T> {
    fn default() -> Self {
        Self {
            raw: AtomicTagPtr::null(),
            _marker: PhantomData,
        }
    }
}

impl<T> RecordPtr<T> {
    pub(crate) fn load(&self) -> Head<T> {
        Head(self.raw.load(Ordering::Acquire))
    }

    /// Replaces `current` with the untagged `new` record. Fails if the head
    /// changed, including when a migration tagged it.
    pub(crate) fn compare_exchange(
        &self,
        current: Head<T>,
        new: *mut Record<T>,
    ) -> Result<(), Head<T>> {
        self.raw
            .compare_exchange(
                current.0,
                TagPtr::new(new),
                (Ordering::AcqRel, Ordering::Acquire),
            )
            .map(|_| ())
            .map_err(Head)
    }

    /// Sets `MOVING`, and `MOVED` as well if the bucket never held a record.
    /// Returns the frozen head.
    pub(crate) fn freeze(&self) -> Head<T> {
        let previous = self.raw.fetch_or(MOVING_TAG, Ordering::AcqRel);
        let head = Head(previous).with_tag(MOVING_TAG);

        // A moving head keeps its pointer, so an empty one stays empty.
        if head.is_null() && !head.is_moved() {
            let previous = self.raw.fetch_or(MOVED_TAG, Ordering::AcqRel);
            return Head(previous).with_tag(MOVED_TAG);
        }
        head
    }

    /// Marks a frozen head as done, recording whether its record now belongs
    /// to the next store.
    pub(crate) fn mark_moved(&self, forwarded: bool) {
        let tag = if forwarded {
            MOVED_TAG | FORWARDED_TAG
        } else {
            MOVED_TAG
        };
        let _ = self.raw.fetch_or(tag, Ordering::AcqRel);
    }

    /// Takes the head out of a store that no thread can reach anymore.
    pub(crate) fn take(&mut self) -> Head<T> {
        Head(self.raw.swap(TagPtr::null(), Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RecordPtr};
    use crate::mmm::Domain;

    use std::sync::Arc;

    #[test]
    fn freeze_tags_empty_and_live_heads() {
        let domain = Domain::new();
        let guard = domain.pin();

        let empty = RecordPtr::<u32>::default();
        let frozen = empty.freeze();
        assert!(frozen.is_moving() && frozen.is_moved() && frozen.is_null());

        let mut live = RecordPtr::default();
        let rec = Box::into_raw(Box::new(Record::new(Some(7_u32))));
        assert!(live.compare_exchange(live.load(), rec).is_ok());

        let frozen = live.freeze();
        assert!(frozen.is_moving() && !frozen.is_moved());
        assert_eq!(frozen.as_ptr(), rec);
        assert_eq!(frozen.record(&guard).and_then(|r| r.item), Some(7));

        // A frozen head rejects writers.
        let other = Box::into_raw(Box::new(Record::new(Some(8_u32))));
        let stale = super::Head(tagptr::TagPtr::new(rec));
        assert!(live.compare_exchange(stale, other).is_err());

        live.mark_moved(true);
        let head = live.load();
        assert!(head.is_moved() && head.is_forwarded());
        assert_eq!(head.as_ptr(), rec);

        unsafe {
            drop(Box::from_raw(live.take().as_ptr()));
            drop(Box::from_raw(other));
        }
    }

    #[test]
    fn racing_freezes_agree() {
        let domain = Domain::new();
        let guard = domain.pin();

        let empty = Arc::new(RecordPtr::<u32>::default());
        let live = Arc::new(RecordPtr::default());
        let rec = Box::into_raw(Box::new(Record::new(Some(3_u32))));
        assert!(live.compare_exchange(live.load(), rec).is_ok());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (empty, live) = (Arc::clone(&empty), Arc::clone(&live));
                std::thread::spawn(move || {
                    let e = empty.freeze();
                    let l = live.freeze();
                    assert!(e.is_moving() && e.is_moved() && e.is_null());
                    assert!(l.is_moving() && !l.is_moved());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Freezing again changes nothing, and marking is idempotent too.
        let frozen = live.freeze();
        assert_eq!(frozen.as_ptr(), rec);
        assert_eq!(frozen.record(&guard).and_then(|r| r.item), Some(3));
        live.mark_moved(false);
        live.mark_moved(false);
        let head = live.load();
        assert!(head.is_moving() && head.is_moved() && !head.is_forwarded());

        let mut live = Arc::try_unwrap(live).ok().unwrap();
        unsafe { drop(Box::from_raw(live.take().as_ptr())) };
    }

    #[test]
    fn commit_is_set_once() {
        let rec = Record::new(Some(1_u8));
        assert_eq!(rec.write_epoch(), 0);
        assert_eq!(rec.commit_with(|| 5), 5);
        assert_eq!(rec.commit_with(|| 9), 5);
        assert_eq!(rec.sort_epoch(), 5);

        let mut overwrite = Record::new(Some(2_u8));
        overwrite.create_epoch = 3;
        overwrite.commit_with(|| 10);
        assert_eq!(overwrite.sort_epoch(), 3);
    }
}
