use core::{
    alloc::Layout,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use log::debug;

use crate::{
    align::checked_align_up,
    allocator::{AllocError, Allocator, Phase, Stats},
    mutex::{DefaultLock, LockPolicy, Mutex},
    source::{Arena, PageSource, pages_for},
};

/// Monotonic arena allocator.
///
/// Allocation moves a cursor forward through one fixed arena. Nothing is
/// reclaimed individually: `free` does nothing and the whole arena goes back
/// to the page source on [`shutdown`](Allocator::shutdown). The arena never
/// grows.
pub struct BumpAllocator<S: PageSource, L: LockPolicy = DefaultLock> {
    state: Mutex<L, BumpState<S>>,
    active: AtomicBool,
    stats: Stats,
}

struct BumpState<S> {
    source: S,
    phase: Phase,
    arena: Option<Arena>,
    capacity: usize,

    current: usize,
    remaining: usize,
}

impl<S: PageSource, L: LockPolicy> BumpAllocator<S, L> {
    /// An uninitialized allocator that will manage `capacity` bytes taken
    /// from `source`.
    pub const fn new(source: S, capacity: usize) -> Self {
        Self {
            state: Mutex::const_new(
                L::INIT,
                BumpState {
                    source,
                    phase: Phase::Uninitialized,
                    arena: None,
                    capacity,
                    current: 0,
                    remaining: 0,
                },
            ),
            active: AtomicBool::new(false),
            stats: Stats::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Bytes left between the cursor and the end of the arena.
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }
}

impl<S: PageSource, L: LockPolicy> Allocator for BumpAllocator<S, L> {
    fn initialize(&self) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        if state.phase == Phase::Active {
            return Ok(());
        }

        let capacity = state.capacity;
        if capacity == 0 {
            return Err(AllocError::ArenaTooSmall(capacity));
        }

        let pages = pages_for(capacity);
        let Some(arena) = (unsafe { state.source.allocate_pages(pages) }) else {
            return Err(AllocError::PagesUnavailable { pages });
        };

        if arena.size() < capacity {
            unsafe { state.source.free_pages(arena) };
            return Err(AllocError::PagesUnavailable { pages });
        }

        state.arena = Some(arena);
        state.current = arena.start_addr();
        state.remaining = capacity;
        state.phase = Phase::Active;
        self.active.store(true, Ordering::Release);
        drop(state);

        debug!(
            "bump: arena {:#x}..{:#x} ({capacity} bytes)",
            arena.start_addr(),
            arena.start_addr() + capacity
        );
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();

        let released = state.arena.take();
        if let Some(arena) = released {
            unsafe { state.source.free_pages(arena) };
        }
        if state.phase == Phase::Active {
            state.phase = Phase::ShutDown;
        }

        state.current = 0;
        state.remaining = 0;
        self.active.store(false, Ordering::Release);
        self.stats.reset();
        drop(state);

        if let Some(arena) = released {
            debug!("bump: released arena {:#x}", arena.start_addr());
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::ZeroSized);
        }

        let mut state = self.state.lock();
        let arena = match (state.phase, state.arena) {
            (Phase::Active, Some(arena)) => arena,
            _ => return Err(AllocError::Uninitialized),
        };

        debug_assert!(state.current >= arena.start_addr());
        debug_assert_eq!(
            state.remaining,
            arena.start_addr() + state.capacity - state.current
        );

        // padding is consumed space, charged like the payload
        let start = checked_align_up(state.current, layout.align())
            .ok_or(AllocError::OutOfMemory)?;
        let pad = start - state.current;
        let needed = pad
            .checked_add(layout.size())
            .ok_or(AllocError::OutOfMemory)?;

        if state.remaining < needed {
            return Err(AllocError::OutOfMemory);
        }

        state.current = start + layout.size();
        state.remaining -= needed;
        self.stats.record_alloc(needed);

        let ptr = unsafe { arena.base().add(start - arena.start_addr()) };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn reallocate(
        &self,
        _ptr: NonNull<u8>,
        _layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        Err(AllocError::Unsupported)
    }

    unsafe fn free(&self, _ptr: NonNull<u8>) {}

    fn total_allocated(&self) -> usize {
        self.stats.allocated()
    }

    fn total_freed(&self) -> usize {
        self.stats.freed()
    }
}

impl<S: PageSource, L: LockPolicy> Drop for BumpAllocator<S, L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::testing::{MockSource, SourceStats, addr};
    use crate::mutex::{NoLock, SpinLock};
    use crate::source::PAGE_SIZE;
    use core::alloc::Layout;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    fn bump(
        capacity: usize,
    ) -> (BumpAllocator<MockSource, NoLock>, Rc<RefCell<SourceStats>>) {
        let stats = Rc::new(RefCell::new(SourceStats::default()));
        let a = BumpAllocator::new(MockSource::new(stats.clone()), capacity);
        a.initialize().unwrap();
        (a, stats)
    }

    fn bytes(n: usize) -> Layout {
        Layout::from_size_align(n, 1).unwrap()
    }

    #[test]
    fn exhaustion_then_smaller_fit() {
        let (a, _) = bump(64);

        let p = a.allocate(bytes(32)).unwrap();
        assert_eq!(p.len(), 32);
        assert_eq!(a.remaining(), 32);

        assert_eq!(a.allocate(bytes(40)), Err(AllocError::OutOfMemory));
        assert_eq!(a.remaining(), 32);

        let q = a.allocate(bytes(32)).unwrap();
        assert_eq!(addr(q), addr(p) + 32);
        assert_eq!(a.remaining(), 0);
    }

    #[test]
    fn alloc_respects_alignment_and_charges_padding() {
        let (a, _) = bump(PAGE_SIZE);

        a.allocate(bytes(1)).unwrap();
        let layout = Layout::from_size_align(24, 64).unwrap();
        let p = a.allocate(layout).unwrap();

        assert_eq!(addr(p) % 64, 0);
        assert_eq!(p.len(), 24);
        // 1 byte, 63 bytes padding, 24 bytes
        assert_eq!(a.total_allocated(), 1 + 63 + 24);
        assert_eq!(a.remaining(), PAGE_SIZE - 88);
    }

    #[test]
    fn bump_allocates_monotonically() {
        let (a, _) = bump(PAGE_SIZE);

        let l1 = Layout::from_size_align(16, 8).unwrap();
        let l2 = Layout::from_size_align(32, 8).unwrap();

        let p1 = a.allocate(l1).unwrap();
        let p2 = a.allocate(l2).unwrap();

        assert!(addr(p2) >= addr(p1) + p1.len());
    }

    #[test]
    fn free_never_reclaims() {
        let (a, _) = bump(256);

        let mut used = 0;
        for n in [8, 24, 40, 16] {
            let p = a.allocate(bytes(n)).unwrap();
            unsafe { a.free(p.cast()) };

            assert_eq!(a.total_freed(), 0);
            assert!(a.used() > used);
            assert_eq!(a.used(), a.total_allocated() - a.total_freed());
            used = a.used();
        }
    }

    #[test]
    fn initialize_is_idempotent() {
        let (a, stats) = bump(128);
        a.allocate(bytes(10)).unwrap();

        assert_eq!(a.initialize(), Ok(()));
        assert_eq!(a.initialize(), Ok(()));

        assert_eq!(a.used(), 10);
        assert_eq!(a.remaining(), 118);
        assert_eq!(stats.borrow().requested, 1);
    }

    #[test]
    fn initialize_fails_when_source_refuses() {
        let stats = Rc::new(RefCell::new(SourceStats::default()));
        let a: BumpAllocator<_, NoLock> =
            BumpAllocator::new(MockSource::failing(stats), 3 * PAGE_SIZE);

        assert_eq!(
            a.initialize(),
            Err(AllocError::PagesUnavailable { pages: 3 })
        );
        assert!(!a.is_active());
        assert_eq!(a.allocate(bytes(1)), Err(AllocError::Uninitialized));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let stats = Rc::new(RefCell::new(SourceStats::default()));
        let a: BumpAllocator<_, NoLock> =
            BumpAllocator::new(MockSource::new(stats), 0);

        assert_eq!(a.initialize(), Err(AllocError::ArenaTooSmall(0)));
    }

    #[test]
    fn allocate_before_initialize_fails() {
        let stats = Rc::new(RefCell::new(SourceStats::default()));
        let a: BumpAllocator<_, NoLock> =
            BumpAllocator::new(MockSource::new(stats.clone()), 64);

        assert_eq!(a.allocate(bytes(8)), Err(AllocError::Uninitialized));
        assert_eq!(stats.borrow().requested, 0);
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        let (a, _) = bump(64);
        assert_eq!(a.allocate(bytes(0)), Err(AllocError::ZeroSized));
        assert_eq!(a.remaining(), 64);
    }

    #[test]
    fn shutdown_releases_arena_and_resets_counters() {
        let (a, stats) = bump(PAGE_SIZE);
        a.allocate(bytes(100)).unwrap();

        assert!(a.is_active());
        a.shutdown();

        assert!(!a.is_active());
        assert_eq!(stats.borrow().released, 1);
        assert_eq!(a.total_allocated(), 0);
        assert_eq!(a.used(), 0);
        assert_eq!(a.remaining(), 0);
        assert_eq!(a.allocate(bytes(1)), Err(AllocError::Uninitialized));

        // a second shutdown has nothing left to release
        a.shutdown();
        assert_eq!(stats.borrow().released, 1);

        a.initialize().unwrap();
        assert_eq!(a.remaining(), PAGE_SIZE);
        assert_eq!(stats.borrow().requested, 2);
    }

    #[test]
    fn drop_releases_arena() {
        let (a, stats) = bump(PAGE_SIZE);
        a.allocate(bytes(80)).unwrap();

        drop(a);
        assert_eq!(stats.borrow().requested, 1);
        assert_eq!(stats.borrow().released, 1);
    }

    #[test]
    fn runs_on_borrowed_static_pages() {
        use crate::source::static_buff::StaticPages;

        let mut pages = StaticPages::<{ 2 * PAGE_SIZE }>::new();
        {
            let a: BumpAllocator<_, SpinLock> =
                BumpAllocator::new(&mut pages, PAGE_SIZE + 1);
            a.initialize().unwrap();

            let p = a.allocate(bytes(PAGE_SIZE + 1)).unwrap();
            assert_eq!(addr(p) % PAGE_SIZE, 0);
            assert_eq!(a.remaining(), 0);
        }
        // the only arena was the last one handed out, so it rolls back
        assert_eq!(pages.pages_left(), 2);
    }

    #[test]
    fn reallocate_is_unsupported() {
        let (a, _) = bump(64);
        let p = a.allocate(bytes(8)).unwrap();

        let r = unsafe { a.reallocate(p.cast(), bytes(16)) };
        assert_eq!(r, Err(AllocError::Unsupported));
        assert_eq!(a.used(), 8);
    }

    #[test]
    fn allocate_zeroed_clears_region() {
        let (a, _) = bump(PAGE_SIZE);

        let p = a.allocate_zeroed(bytes(512)).unwrap();
        let slice = unsafe { p.as_ref() };
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn ranges_are_disjoint() {
        let (a, _) = bump(PAGE_SIZE);

        let mut ranges = Vec::new();
        let aligns = [1, 8, 4, 16, 2, 32].into_iter().cycle().take(30);
        for (i, align) in aligns.enumerate() {
            let layout = Layout::from_size_align(i % 7 + 1, align).unwrap();
            let p = a.allocate(layout).unwrap();
            ranges.push((addr(p), addr(p) + p.len()));
        }

        ranges.sort();
        for w in ranges.windows(2) {
            assert!(w[0].1 <= w[1].0);
        }
    }

    #[test]
    #[cfg(feature = "std")]
    fn concurrent_allocations_do_not_overlap() {
        use crate::source::os_heap::OsPages;

        let a = Arc::new(BumpAllocator::<OsPages, SpinLock>::new(
            OsPages::new(),
            16 * PAGE_SIZE,
        ));
        a.initialize().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&a);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| addr(a.allocate(bytes(16)).unwrap()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for p in h.join().unwrap() {
                assert!(seen.insert(p), "address handed out twice");
            }
        }

        assert_eq!(a.total_allocated(), 4 * 100 * 16);
        assert_eq!(a.remaining(), 16 * PAGE_SIZE - 6400);
    }
}
