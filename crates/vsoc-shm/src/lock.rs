//! The guest-and-host lock.
//!
//! An adaptive mutex packed into one 32-bit atomic inside a region's data
//! area, so threads on both sides of the VM boundary can contend on it.
//! Sleeping and waking go through the owning view's signal plumbing, which
//! forwards futex wake-ups across the boundary.
//!
//! # Word encoding
//!
//! ```text
//! bit 31       host-side waiter present
//! bit 30       guest-side waiter present
//! bits 0..30   owner handle: thread id, with bit 29 set for host owners
//!              (thread ids collide between sides)
//! ```
//!
//! Value 0 is unlocked.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::control::Side;
use crate::view::{RegionSignals, Sides};

const WAITING_HOST: u32 = 1 << 31;
const WAITING_GUEST: u32 = 1 << 30;
const OWNER_MASK: u32 = WAITING_GUEST - 1;
const HOST_OWNED: u32 = 1 << 29;
const TID_MASK: u32 = HOST_OWNED - 1;

/// Cross-side adaptive mutex. Lives inside a region layout; all-zero bytes
/// are the unlocked state.
#[repr(transparent)]
pub struct GuestAndHostLock {
    word: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<GuestAndHostLock>() == 4);

impl GuestAndHostLock {
    /// An unlocked lock, for layouts constructed outside shared memory.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    /// Acquire the lock, sleeping on the region's signal plumbing while it
    /// is contended.
    pub fn lock(&self, region: &dyn RegionSignals) {
        let me = owner_word(region.side(), current_tid());
        let wait_flag = waiting_flag(region.side());
        loop {
            match self.try_acquire(me, wait_flag) {
                Ok(()) => return,
                Err(observed) => region.wait_for_signal(&self.word, observed),
            }
        }
    }

    /// Try to acquire without sleeping. Returns false when the lock is held.
    pub fn try_lock(&self, region: &dyn RegionSignals) -> bool {
        let me = owner_word(region.side(), current_tid());
        self.word
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the lock and wake whichever sides have published waiters.
    ///
    /// Unlocking a word we do not own is a protocol violation and aborts.
    pub fn unlock(&self, region: &dyn RegionSignals) {
        let me = owner_word(region.side(), current_tid());
        self.release(me, region);
    }

    /// Release a lock our side may have left held, after coming up with no
    /// other local threads running. Owned by the other side or free: no-op.
    pub fn recover(&self, region: &dyn RegionSignals) {
        let observed = self.word.load(Ordering::Acquire);
        if observed == 0 {
            return;
        }
        let owner = observed & OWNER_MASK;
        let host_owned = owner & HOST_OWNED != 0;
        if host_owned != (region.side() == Side::Host) {
            return;
        }
        // By precondition no thread of ours really waits; the recorded
        // owner bits stand in for the (dead) owner's tid.
        self.release(owner, region);
    }

    /// One acquisition attempt.
    ///
    /// `Ok` means acquired. `Err(v)` carries the word value under which our
    /// side's waiter flag is published, for the caller to sleep against.
    fn try_acquire(&self, me: u32, wait_flag: u32) -> Result<(), u32> {
        let mut observed = match self
            .word
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return Ok(()),
            Err(v) => v,
        };
        loop {
            if observed == 0 {
                // Freed between our attempts; take it from the top.
                match self
                    .word
                    .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => return Ok(()),
                    Err(v) => {
                        observed = v;
                        continue;
                    }
                }
            }
            if observed & wait_flag != 0 {
                return Err(observed);
            }
            match self.word.compare_exchange(
                observed,
                observed | wait_flag,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Err(observed | wait_flag),
                Err(v) => observed = v,
            }
        }
    }

    fn release(&self, expected_owner: u32, region: &dyn RegionSignals) {
        let mut observed = self.word.load(Ordering::Acquire);
        loop {
            if observed & OWNER_MASK != expected_owner {
                fatal!(
                    "unlock of a lock word owned by {:#x}, not by us ({:#x})",
                    observed & OWNER_MASK,
                    expected_owner
                );
            }
            match self
                .word
                .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(v) => observed = v,
            }
        }

        let guest_waiting = observed & WAITING_GUEST != 0;
        let host_waiting = observed & WAITING_HOST != 0;
        let sides = match (guest_waiting, host_waiting) {
            (false, false) => None,
            (true, true) => Some(Sides::Both),
            (true, false) => Some(relative(region.side(), Side::Guest)),
            (false, true) => Some(relative(region.side(), Side::Host)),
        };
        if let Some(sides) = sides {
            region.send_signal(sides, &self.word);
        }
    }

    #[cfg(test)]
    fn raw(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }
}

impl Default for GuestAndHostLock {
    fn default() -> Self {
        Self::new()
    }
}

fn waiting_flag(side: Side) -> u32 {
    match side {
        Side::Host => WAITING_HOST,
        Side::Guest => WAITING_GUEST,
    }
}

fn relative(ours: Side, target: Side) -> Sides {
    if ours == target {
        Sides::Local
    } else {
        Sides::Peer
    }
}

fn owner_word(side: Side, tid: u32) -> u32 {
    if tid & !TID_MASK != 0 {
        fatal!("thread id {:#x} does not fit the lock's owner field", tid);
    }
    match side {
        Side::Host => tid | HOST_OWNED,
        Side::Guest => tid,
    }
}

fn current_tid() -> u32 {
    thread_local! {
        static TID: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
    }
    TID.with(|cached| {
        let mut tid = cached.get();
        if tid == 0 {
            // SAFETY: gettid takes no pointers and cannot fail.
            tid = unsafe { libc::syscall(libc::SYS_gettid) } as u32;
            cached.set(tid);
        }
        tid
    })
}
