//! Epoch-based memory management.
//!
//! Every table in this crate hands out references into memory that other
//! threads may concurrently unlink: a store that a migration has superseded, or
//! a record that a write has replaced. Such memory cannot be freed at the moment
//! it is unlinked, because a reader that loaded the pointer a moment earlier may
//! still be looking at it.
//!
//! A [`Domain`] solves this with epochs. The domain owns a global epoch counter
//! and one reservation slot per participating thread. Before touching shared
//! state, a thread [pins](Domain::pin) itself, publishing the epoch it observed
//! in its slot; dropping the returned [`Guard`] clears the slot again. Unlinked
//! objects are [retired](Domain::retire) instead of freed: the domain records
//! the epoch of the retirement and appends the object to the retiring thread's
//! deferred list. A periodic sweep advances the epoch, computes the oldest
//! reservation published by any thread, and frees every deferred object whose
//! retirement epoch is strictly older. A thread that could have loaded a pointer
//! before it was unlinked must have pinned before the unlink, so its
//! reservation is no newer than the retirement epoch and keeps the object alive.
//!
//! The epoch counter doubles as a clock for the ordered table, which stamps
//! every committed write with [`Domain::advance`] and reads consistent views at
//! a [linearization epoch](Domain::pin_linearized).
//!
//! Neither pinning nor retiring ever blocks on another thread. The only lock in
//! this module guards a thread's own deferred list, which other threads touch
//! only when the domain is dropped.

use crate::common::constants::{DEFAULT_RETIRE_FREQUENCY, UNRESERVED_EPOCH};

#[cfg(feature = "unstable-debug-counters")]
use crate::common::debug_counters::InternalGlobalDebugCounters as Counters;

use std::{
    fmt,
    marker::PhantomData,
    mem,
    sync::atomic::{self, AtomicU64, AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use thread_local::ThreadLocal;

type Reclaim = Box<dyn FnOnce() + Send>;

struct Retired {
    epoch: u64,
    reclaim: Reclaim,
}

struct Participant {
    reservation: CachePadded<AtomicU64>,
    depth: AtomicUsize,
    retires: AtomicUsize,
    retired: Mutex<Vec<Retired>>,
}

impl Participant {
    fn new() -> Self {
        Self {
            reservation: CachePadded::new(AtomicU64::new(UNRESERVED_EPOCH)),
            depth: AtomicUsize::new(0),
            retires: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }
}

/// An epoch-based reclamation domain.
///
/// Each table creates its own domain unless one is shared through
/// [`TableBuilder::domain`][builder-domain]. Threads register with a domain
/// lazily, the first time they pin it.
///
/// [builder-domain]: ./struct.TableBuilder.html#method.domain
pub struct Domain {
    epoch: CachePadded<AtomicU64>,
    participants: ThreadLocal<Participant>,
    retire_frequency: usize,
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain {
    /// Creates a domain that sweeps every 64 retirements per thread.
    pub fn new() -> Self {
        Self::with_retire_frequency(DEFAULT_RETIRE_FREQUENCY)
    }

    /// Creates a domain whose threads sweep their deferred lists every
    /// `retire_frequency` retirements.
    ///
    /// # Panics
    ///
    /// Panics if `retire_frequency` is 0.
    pub fn with_retire_frequency(retire_frequency: usize) -> Self {
        assert!(retire_frequency > 0, "retire_frequency must be positive");

        Self {
            epoch: CachePadded::new(AtomicU64::new(1)),
            participants: ThreadLocal::new(),
            retire_frequency,
        }
    }

    /// Returns the current global epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Starts a basic operation on the calling thread.
    ///
    /// Until the returned guard is dropped, nothing retired at or after the
    /// published epoch will be freed. Pinning is re-entrant: a nested pin keeps
    /// the outer reservation.
    pub fn pin(&self) -> Guard<'_> {
        let participant = self.participant();

        if participant.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            let epoch = self.epoch.load(Ordering::SeqCst);
            participant.reservation.store(epoch, Ordering::SeqCst);
            // Loads of shared pointers must not be ordered before the
            // reservation becomes visible.
            atomic::fence(Ordering::SeqCst);
        }

        Guard {
            domain: self,
            participant,
            _not_send: PhantomData,
        }
    }

    /// Starts a linearized operation: pins the thread, then advances the global
    /// epoch and returns the new value.
    ///
    /// Every write committed before this call carries an epoch no greater than
    /// the returned one, and every write committed afterwards carries a greater
    /// one.
    pub fn pin_linearized(&self) -> (Guard<'_>, u64) {
        let guard = self.pin();
        let epoch = self.advance();
        (guard, epoch)
    }

    /// Advances the global epoch and returns the new value.
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Defers dropping `object` until no pinned thread can still observe it.
    pub fn retire<T: Send + 'static>(&self, object: Box<T>) {
        self.defer(Box::new(move || mem::drop(object)));
    }

    /// Like [`retire`](Self::retire), but hands the object to `cleanup` instead
    /// of dropping it, once it is safe to do so.
    pub fn retire_with<T, F>(&self, object: Box<T>, cleanup: F)
    where
        T: Send + 'static,
        F: FnOnce(Box<T>) + Send + 'static,
    {
        self.defer(Box::new(move || cleanup(object)));
    }

    /// Sweeps the calling thread's deferred list now.
    pub fn collect(&self) {
        self.sweep(self.participant());
    }

    fn participant(&self) -> &Participant {
        self.participants.get_or(Participant::new)
    }

    fn defer(&self, reclaim: Reclaim) {
        // The unlink that preceded this call must be ordered before the epoch
        // read below.
        atomic::fence(Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let participant = self.participant();

        participant.retired.lock().push(Retired { epoch, reclaim });

        #[cfg(feature = "unstable-debug-counters")]
        Counters::retired();

        let retires = participant.retires.fetch_add(1, Ordering::Relaxed) + 1;
        if retires % self.retire_frequency == 0 {
            self.sweep(participant);
        }
    }

    fn sweep(&self, participant: &Participant) {
        self.advance();
        let oldest = self.oldest_reservation();

        let ready = {
            let mut retired = participant.retired.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                mem::take(&mut *retired).into_iter().partition(|r| r.epoch < oldest);
            *retired = pending;
            ready
        };

        #[cfg(feature = "logging")]
        log::trace!(
            "reclaiming {} deferred objects (oldest reservation {oldest})",
            ready.len()
        );

        #[cfg(feature = "unstable-debug-counters")]
        Counters::reclaimed(ready.len() as u64);

        // Run outside the lock; a cleanup may itself retire.
        for retired in ready {
            (retired.reclaim)();
        }
    }

    /// The oldest epoch any thread currently has reserved, or
    /// `UNRESERVED_EPOCH` if no thread is pinned.
    pub(crate) fn oldest_reservation(&self) -> u64 {
        atomic::fence(Ordering::SeqCst);
        self.participants
            .iter()
            .map(|p| p.reservation.load(Ordering::SeqCst))
            .min()
            .unwrap_or(UNRESERVED_EPOCH)
    }

    #[cfg(test)]
    pub(crate) fn deferred_len(&self) -> usize {
        self.participant().retired.lock().len()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        for participant in self.participants.iter_mut() {
            for retired in participant.retired.get_mut().drain(..) {
                (retired.reclaim)();

                #[cfg(feature = "unstable-debug-counters")]
                Counters::reclaimed(1);
            }
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("epoch", &self.epoch())
            .field("retire_frequency", &self.retire_frequency)
            .finish()
    }
}

/// Keeps the current thread pinned to a [`Domain`].
///
/// A guard is bound to the thread that created it.
#[must_use]
pub struct Guard<'d> {
    domain: &'d Domain,
    participant: &'d Participant,
    _not_send: PhantomData<*mut ()>,
}

impl<'d> Guard<'d> {
    /// The domain this guard pins. Objects unlinked while the guard is held
    /// are retired into it.
    pub fn domain(&self) -> &'d Domain {
        self.domain
    }

    /// The epoch this thread published when it was first pinned.
    pub fn reservation(&self) -> u64 {
        self.participant.reservation.load(Ordering::Relaxed)
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if self.participant.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.participant
                .reservation
                .store(UNRESERVED_EPOCH, Ordering::Release);
        }
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("reservation", &self.reservation())
            .finish()
    }
}
