use core::cell::Cell;

use lock_api::GuardNoSend;

/// The mutual-exclusion capability every allocator is generic over.
///
/// Anything implementing [`lock_api::RawMutex`] (`lock` / `unlock`) can guard
/// an allocator's state.
pub use lock_api::RawMutex as LockPolicy;

pub(crate) type Mutex<L, T> = lock_api::Mutex<L, T>;

/// A lock for single-threaded configurations.
///
/// Acquiring it costs a flag write. It is `!Sync`, so an allocator built on it
/// cannot be shared across threads, and it panics on re-entrant locking.
pub struct NoLock {
    held: Cell<bool>,
}

unsafe impl LockPolicy for NoLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        held: Cell::new(false),
    };

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        assert!(!self.held.replace(true), "NoLock locked re-entrantly");
    }

    fn try_lock(&self) -> bool {
        !self.held.replace(true)
    }

    unsafe fn unlock(&self) {
        self.held.set(false);
    }

    fn is_locked(&self) -> bool {
        self.held.get()
    }
}

/// Busy-waiting lock, usable without `std` and from interrupt context.
pub type SpinLock = spin::Mutex<()>;

/// Parking lock for hosted, contended use.
#[cfg(feature = "std")]
pub type ParkingLock = parking_lot::RawMutex;

#[cfg(feature = "std")]
pub type DefaultLock = ParkingLock;

#[cfg(not(feature = "std"))]
pub type DefaultLock = SpinLock;
