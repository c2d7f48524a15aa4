use core::{
    alloc::Layout,
    cmp, mem,
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, Ordering},
};

use log::debug;

use crate::{
    align::{checked_align_up, is_aligned},
    allocator::{AllocError, Allocator, Phase, Stats},
    mutex::{DefaultLock, LockPolicy, Mutex},
    source::{Arena, PageSource, pages_for},
};

/// Header at the start of every block, free or live.
///
/// On the free list `next` links to the following free block. While a block
/// is live, `next` points back at the block itself, or, in the extra header
/// written in front of an over-aligned payload, at the block that owns it.
#[derive(Clone, Copy)]
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
    size: usize,
}

/// Bytes of metadata in front of every block.
pub const HEADER_SIZE: usize = mem::size_of::<FreeBlock>();

/// Granularity of block sizes; keeps every carved header aligned.
pub const BLOCK_ALIGN: usize = mem::align_of::<FreeBlock>();

/// General-purpose first-fit allocator over one fixed arena.
///
/// Freed blocks go to the head of the free list and are reused LIFO. Blocks
/// are split on allocation but never merged on free; call
/// [`coalesce`](FreeListAllocator::coalesce) to merge neighbours.
///
/// Nothing logs while the lock is held, and the allocation paths never log,
/// so a logger that allocates may run on top of this allocator installed as
/// `#[global_allocator]`.
pub struct FreeListAllocator<S: PageSource, L: LockPolicy = DefaultLock> {
    state: Mutex<L, FreeListState<S>>,
    active: AtomicBool,
    stats: Stats,
}

struct FreeListState<S> {
    source: S,
    phase: Phase,
    arena: Option<Arena>,
    capacity: usize,
    head: Option<NonNull<FreeBlock>>,
}

// The list only ever points into the arena this state owns.
unsafe impl<S: Send> Send for FreeListState<S> {}

fn addr_of(block: NonNull<FreeBlock>) -> usize {
    block.as_ptr().addr()
}

/// Distance from the start of `block`'s payload to the first address that
/// satisfies `align` and leaves room for a forwarding header.
fn payload_offset(block: NonNull<FreeBlock>, align: usize) -> Option<usize> {
    let start = addr_of(block) + HEADER_SIZE;
    let offset = checked_align_up(start, align)? - start;

    if offset != 0 && offset < HEADER_SIZE {
        // align > BLOCK_ALIGN here, so align >= HEADER_SIZE
        offset.checked_add(align)
    } else {
        Some(offset)
    }
}

/// The block owning a pointer previously handed out.
///
/// # Safety
///
/// `ptr` must be a live payload pointer from this allocator.
unsafe fn origin_of(ptr: NonNull<u8>) -> NonNull<FreeBlock> {
    unsafe {
        let header = ptr.sub(HEADER_SIZE).cast::<FreeBlock>();
        (*header.as_ptr()).next.unwrap_or(header)
    }
}

/// Shrinks `block` to `span` payload bytes if the tail can hold a header plus
/// at least one byte, and returns the tail as a new free block.
///
/// # Safety
///
/// `block` must be a valid header with `size >= span`, `span` a multiple of
/// `BLOCK_ALIGN`.
unsafe fn split(
    block: NonNull<FreeBlock>,
    span: usize,
    rest_next: Option<NonNull<FreeBlock>>,
) -> Option<NonNull<FreeBlock>> {
    let size = unsafe { (*block.as_ptr()).size };
    let remainder = size - span;
    if remainder <= HEADER_SIZE {
        return None;
    }

    unsafe {
        let rest =
            block.cast::<u8>().add(HEADER_SIZE + span).cast::<FreeBlock>();
        rest.write(FreeBlock {
            next: rest_next,
            size: remainder - HEADER_SIZE,
        });
        (*block.as_ptr()).size = span;
        Some(rest)
    }
}

/// Marks an unlinked block live and returns the payload pointer.
///
/// # Safety
///
/// `block` must be unlinked and `offset` come from `payload_offset`.
unsafe fn hand_out(block: NonNull<FreeBlock>, offset: usize) -> NonNull<u8> {
    unsafe {
        (*block.as_ptr()).next = Some(block);

        let payload = block.cast::<u8>().add(HEADER_SIZE + offset);
        if offset != 0 {
            payload.sub(HEADER_SIZE).cast::<FreeBlock>().write(FreeBlock {
                next: Some(block),
                size: offset,
            });
        }
        payload
    }
}

impl<S> FreeListState<S> {
    fn link(
        &mut self,
        prev: Option<NonNull<FreeBlock>>,
        to: Option<NonNull<FreeBlock>>,
    ) {
        match prev {
            None => self.head = to,
            Some(p) => unsafe { (*p.as_ptr()).next = to },
        }
    }

    /// First fit. Returns the payload and the bytes charged for it.
    ///
    /// `size` must be a multiple of `BLOCK_ALIGN`. The list is untouched when
    /// nothing fits.
    unsafe fn take_first_fit(
        &mut self,
        size: usize,
        align: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current {
            let FreeBlock { next, size: available } = unsafe { block.read() };

            let fit = payload_offset(block, align)
                .and_then(|offset| Some((offset, offset.checked_add(size)?)));

            match fit {
                Some((offset, span)) if span <= available => {
                    let rest = unsafe { split(block, span, next) };
                    self.link(prev, rest.or(next));

                    let charged = unsafe { (*block.as_ptr()).size };
                    let payload = unsafe { hand_out(block, offset) };
                    return Some((payload, charged));
                }
                _ => {}
            }

            prev = current;
            current = next;
        }

        None
    }

    /// Pushes the block owning `ptr` onto the head of the list and returns
    /// its size.
    unsafe fn release(&mut self, ptr: NonNull<u8>) -> usize {
        let block = unsafe { origin_of(ptr) };
        debug_assert!(
            self.arena.is_some_and(|a| a.contains(addr_of(block))),
            "freeing a pointer outside the arena"
        );

        unsafe {
            (*block.as_ptr()).next = self.head;
            self.head = Some(block);
            (*block.as_ptr()).size
        }
    }

    /// Unlinks the free block starting at `addr` if its size, plus the header
    /// it gives up, reaches `needed`. Returns its size.
    fn unlink_at(&mut self, addr: usize, needed: usize) -> Option<usize> {
        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current {
            let FreeBlock { next, size } = unsafe { block.read() };
            if addr_of(block) == addr {
                if HEADER_SIZE + size < needed {
                    return None;
                }
                self.link(prev, next);
                return Some(size);
            }
            prev = current;
            current = next;
        }

        None
    }

    /// Resizes the block holding `ptr` without moving it: shrinking returns
    /// the tail to the list, growing absorbs the physically next block when
    /// it is free and large enough. Returns the old and new block sizes.
    unsafe fn resize_in_place(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
    ) -> Option<(usize, usize)> {
        if !is_aligned(ptr.as_ptr().addr(), align) {
            return None;
        }

        let block = unsafe { origin_of(ptr) };
        let offset = ptr.as_ptr().addr() - (addr_of(block) + HEADER_SIZE);
        let span = offset.checked_add(size)?;
        let old = unsafe { (*block.as_ptr()).size };

        if span > old {
            let neighbour = addr_of(block) + HEADER_SIZE + old;
            let absorbed = self.unlink_at(neighbour, span - old)?;
            unsafe { (*block.as_ptr()).size = old + HEADER_SIZE + absorbed };
        }

        if let Some(rest) = unsafe { split(block, span, self.head) } {
            self.head = Some(rest);
        }

        Some((old, unsafe { (*block.as_ptr()).size }))
    }

    /// Bytes the caller may use starting at `ptr`.
    unsafe fn usable(ptr: NonNull<u8>) -> usize {
        let block = unsafe { origin_of(ptr) };
        let offset = ptr.as_ptr().addr() - (addr_of(block) + HEADER_SIZE);
        unsafe { (*block.as_ptr()).size - offset }
    }

    /// Sorts the list by address, then merges physically adjacent blocks.
    fn coalesce(&mut self) -> usize {
        let mut sorted: Option<NonNull<FreeBlock>> = None;
        let mut current = self.head;

        while let Some(block) = current {
            current = unsafe { (*block.as_ptr()).next };

            let mut prev: Option<NonNull<FreeBlock>> = None;
            let mut cursor = sorted;
            while let Some(c) = cursor {
                if addr_of(c) > addr_of(block) {
                    break;
                }
                prev = cursor;
                cursor = unsafe { (*c.as_ptr()).next };
            }

            unsafe { (*block.as_ptr()).next = cursor };
            match prev {
                None => sorted = Some(block),
                Some(p) => unsafe { (*p.as_ptr()).next = Some(block) },
            }
        }
        self.head = sorted;

        let mut merged = 0;
        let mut current = self.head;
        while let Some(block) = current {
            let FreeBlock { next, size } = unsafe { block.read() };
            match next {
                Some(n)
                    if addr_of(block) + HEADER_SIZE + size == addr_of(n) =>
                {
                    unsafe {
                        let absorbed = n.read();
                        (*block.as_ptr()).size =
                            size + HEADER_SIZE + absorbed.size;
                        (*block.as_ptr()).next = absorbed.next;
                    }
                    merged += 1;
                }
                _ => current = next,
            }
        }

        merged
    }
}

impl<S: PageSource, L: LockPolicy> FreeListAllocator<S, L> {
    /// An uninitialized allocator that will manage `capacity` bytes taken
    /// from `source`.
    pub const fn new(source: S, capacity: usize) -> Self {
        Self {
            state: Mutex::const_new(
                L::INIT,
                FreeListState {
                    source,
                    phase: Phase::Uninitialized,
                    arena: None,
                    capacity,
                    head: None,
                },
            ),
            active: AtomicBool::new(false),
            stats: Stats::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Merges physically adjacent free blocks. Returns how many merges
    /// happened.
    ///
    /// Leaves the list in address order, so the next allocation is
    /// lowest-address first fit.
    pub fn coalesce(&self) -> usize {
        let merged = self.state.lock().coalesce();
        debug!("free list: coalesced {merged} blocks");
        merged
    }

    /// Visits every free block in list order as `(address, size)`.
    ///
    /// `f` runs with the lock held and must not call back into this
    /// allocator.
    pub fn for_each_free_block(&self, mut f: impl FnMut(usize, usize)) {
        let state = self.state.lock();
        let mut current = state.head;

        while let Some(block) = current {
            let FreeBlock { next, size } = unsafe { block.read() };
            f(addr_of(block), size);
            current = next;
        }
    }

    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        self.for_each_free_block(|_, _| count += 1);
        count
    }

    pub fn largest_free_block(&self) -> usize {
        let mut largest = 0;
        self.for_each_free_block(|_, size| largest = largest.max(size));
        largest
    }
}

impl<S: PageSource, L: LockPolicy> Allocator for FreeListAllocator<S, L> {
    fn initialize(&self) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        if state.phase == Phase::Active {
            return Ok(());
        }

        let capacity = state.capacity;
        let managed = capacity & !(BLOCK_ALIGN - 1);
        if managed <= HEADER_SIZE {
            return Err(AllocError::ArenaTooSmall(capacity));
        }

        let pages = pages_for(managed);
        let Some(arena) = (unsafe { state.source.allocate_pages(pages) }) else {
            return Err(AllocError::PagesUnavailable { pages });
        };

        if arena.size() < managed {
            unsafe { state.source.free_pages(arena) };
            return Err(AllocError::PagesUnavailable { pages });
        }

        let first = arena.base().cast::<FreeBlock>();
        unsafe {
            first.write(FreeBlock {
                next: None,
                size: managed - HEADER_SIZE,
            })
        };

        state.arena = Some(arena);
        state.head = Some(first);
        state.phase = Phase::Active;
        self.active.store(true, Ordering::Release);
        drop(state);

        debug!(
            "free list: arena {:#x}..{:#x} ({managed} bytes)",
            arena.start_addr(),
            arena.start_addr() + managed
        );
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();

        state.head = None;
        let released = state.arena.take();
        if let Some(arena) = released {
            unsafe { state.source.free_pages(arena) };
        }
        if state.phase == Phase::Active {
            state.phase = Phase::ShutDown;
        }

        self.active.store(false, Ordering::Release);
        self.stats.reset();
        drop(state);

        if let Some(arena) = released {
            debug!("free list: released arena {:#x}", arena.start_addr());
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::ZeroSized);
        }
        let size = checked_align_up(layout.size(), BLOCK_ALIGN)
            .ok_or(AllocError::OutOfMemory)?;

        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return Err(AllocError::Uninitialized);
        }

        let (ptr, charged) =
            unsafe { state.take_first_fit(size, layout.align()) }
                .ok_or(AllocError::OutOfMemory)?;

        self.stats.record_alloc(charged);
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::ZeroSized);
        }
        let size = checked_align_up(layout.size(), BLOCK_ALIGN)
            .ok_or(AllocError::OutOfMemory)?;

        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return Err(AllocError::Uninitialized);
        }

        if let Some((old, new)) =
            unsafe { state.resize_in_place(ptr, size, layout.align()) }
        {
            if new >= old {
                self.stats.record_alloc(new - old);
            } else {
                self.stats.record_free(old - new);
            }
            return Ok(NonNull::slice_from_raw_parts(ptr, layout.size()));
        }

        let usable = unsafe { FreeListState::<S>::usable(ptr) };
        let (moved, charged) = unsafe {
            state.take_first_fit(size, layout.align())
        }
        .ok_or(AllocError::OutOfMemory)?;

        unsafe {
            ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                moved.as_ptr(),
                cmp::min(usable, layout.size()),
            )
        };
        let freed = unsafe { state.release(ptr) };

        self.stats.record_alloc(charged);
        self.stats.record_free(freed);
        Ok(NonNull::slice_from_raw_parts(moved, layout.size()))
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let mut state = self.state.lock();
        debug_assert_eq!(
            state.phase,
            Phase::Active,
            "free on inactive allocator"
        );
        if state.phase != Phase::Active {
            return;
        }

        let freed = unsafe { state.release(ptr) };
        self.stats.record_free(freed);
    }

    fn total_allocated(&self) -> usize {
        self.stats.allocated()
    }

    fn total_freed(&self) -> usize {
        self.stats.freed()
    }
}

impl<S: PageSource, L: LockPolicy> Drop for FreeListAllocator<S, L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
