//! Centralized lock hierarchy.
//!
//! The original engine documents a strict acquisition order across five independent
//! monitors and relies on every call site respecting it by convention. Here every
//! acquisition goes through [`acquire`], which records the rank of the lock it is
//! about to take against a thread-local "high water mark" and panics (in debug
//! builds only; this check is compiled out in release) if that rank is not strictly
//! greater than whatever is currently held, so acquiring two locks out of order is
//! caught at the point of the mistake rather than as a hard-to-reproduce deadlock
//! under load. This is a runtime discipline enforced by convention (every lock in
//! the crate must be acquired through this module), not a type-level guarantee.
//!
//! Ranks, from outermost to innermost:
//! 1. [`SCHEDULER`] — demand queue, completion condition.
//! 2. [`PREFETCH`] — weak-tracker registry.
//! 3. [`TRACKER_RESOURCES`] — a tracker's attached-resource list.
//! 4. [`RESOURCE_MONITOR`] — one resource's state and counters.
//! 5. [`TRACKER_LISTENERS`] — a tracker's listener list.

use std::cell::Cell;

use parking_lot::{Mutex, MutexGuard};

pub const SCHEDULER: u8 = 1;
pub const PREFETCH: u8 = 2;
pub const TRACKER_RESOURCES: u8 = 3;
pub const RESOURCE_MONITOR: u8 = 4;
pub const TRACKER_LISTENERS: u8 = 5;

thread_local! {
    static HELD_RANK: Cell<u8> = const { Cell::new(0) };
}

/// A lock guard tagged with the rank it was acquired at. Dropping it restores the
/// thread's previous high-water mark, so releasing an inner lock and then taking a
/// sibling at the same rank (e.g. two different resources' monitors, never held
/// simultaneously) remains legal.
pub struct RankGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    previous_rank: u8,
}

impl<'a, T> std::ops::Deref for RankGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> std::ops::DerefMut for RankGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for RankGuard<'a, T> {
    fn drop(&mut self) {
        HELD_RANK.with(|cell| cell.set(self.previous_rank));
    }
}

impl<'a, T> RankGuard<'a, T> {
    /// Borrow the underlying `parking_lot::MutexGuard`, needed to wait on a
    /// [`parking_lot::Condvar`] bound to the same mutex. The rank bookkeeping is
    /// unaffected: the guard is still held (and still restores the previous
    /// high-water mark on drop) for as long as this `RankGuard` is alive.
    pub fn as_mutex_guard(&mut self) -> &mut MutexGuard<'a, T> {
        &mut self.guard
    }
}

/// Acquire `mutex`, asserting that no lock of equal or higher rank is currently held
/// by this thread. `rank` should be one of the constants above.
pub fn acquire<T>(mutex: &Mutex<T>, rank: u8) -> RankGuard<'_, T> {
    let previous_rank = HELD_RANK.with(|cell| cell.get());
    debug_assert!(
        rank > previous_rank,
        "lock order violation: acquiring rank {rank} while holding rank {previous_rank}",
    );
    let guard = mutex.lock();
    HELD_RANK.with(|cell| cell.set(rank));
    RankGuard { guard, previous_rank }
}

/// Returns `true` if no lock is currently held by this thread, used by the listener
/// dispatch to assert that callbacks never run with a lock held (§8, invariant 6).
pub fn no_lock_held() -> bool {
    HELD_RANK.with(|cell| cell.get() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_acquisition_succeeds() {
        let scheduler = Mutex::new(0);
        let resource = Mutex::new(0);
        let _outer = acquire(&scheduler, SCHEDULER);
        let _inner = acquire(&resource, RESOURCE_MONITOR);
        assert!(!no_lock_held());
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn out_of_order_acquisition_panics() {
        let resource = Mutex::new(0);
        let scheduler = Mutex::new(0);
        let _inner = acquire(&resource, RESOURCE_MONITOR);
        let _outer = acquire(&scheduler, SCHEDULER);
    }

    #[test]
    fn guards_restore_previous_rank_on_drop() {
        let scheduler = Mutex::new(0);
        {
            let _outer = acquire(&scheduler, SCHEDULER);
        }
        assert!(no_lock_held());
    }
}
