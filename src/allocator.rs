use core::{
    alloc::Layout,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

pub mod bump;
pub mod free_list;
pub mod strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("arena exhausted")]
    OutOfMemory,
    #[error("operation not supported by this allocator")]
    Unsupported,
    #[error("allocator is not initialized")]
    Uninitialized,
    #[error("page source could not supply {pages} pages")]
    PagesUnavailable { pages: usize },
    #[error("zero-sized request")]
    ZeroSized,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("arena of {0} bytes is too small")]
    ArenaTooSmall(usize),
}

/// The operations every allocation strategy provides.
///
/// All methods take `&self`: implementations serialize mutation behind their
/// lock policy, so one instance may be shared by every caller that needs it.
pub trait Allocator {
    /// Acquire backing storage. Calling this on an active allocator is a
    /// no-op that succeeds.
    fn initialize(&self) -> Result<(), AllocError>;

    /// Return backing storage to the page source and reset the counters.
    ///
    /// Every region handed out before this call is dangling afterwards.
    fn shutdown(&self);

    /// Whether backing storage is currently held. Reads no lock.
    fn is_active(&self) -> bool;

    /// Hand out a region of at least `layout.size()` bytes aligned to
    /// `layout.align()`.
    ///
    /// `Err(AllocError::OutOfMemory)` is the ordinary exhaustion signal.
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError>;

    /// [`allocate`](Allocator::allocate), then zero exactly `layout.size()`
    /// bytes.
    fn allocate_zeroed(
        &self,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let region = self.allocate(layout)?;
        // the region is ours alone until it is returned
        unsafe {
            ptr::write_bytes(region.cast::<u8>().as_ptr(), 0, layout.size())
        };
        Ok(region)
    }

    /// Resize a live region, keeping the lesser of the old and new sizes of
    /// content. The region may move.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed since.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError>;

    /// Release a live region.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed since.
    /// Foreign, interior and double frees are not detected.
    unsafe fn free(&self, ptr: NonNull<u8>);

    fn total_allocated(&self) -> usize;

    fn total_freed(&self) -> usize;

    /// Bytes currently charged to callers.
    fn used(&self) -> usize {
        // freed first: both only grow, so this order never goes negative
        let freed = self.total_freed();
        self.total_allocated().saturating_sub(freed)
    }
}

impl<A: Allocator + ?Sized> Allocator for &A {
    fn initialize(&self) -> Result<(), AllocError> {
        <A as Allocator>::initialize(*self)
    }

    fn shutdown(&self) {
        <A as Allocator>::shutdown(*self)
    }

    fn is_active(&self) -> bool {
        <A as Allocator>::is_active(*self)
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        <A as Allocator>::allocate(*self, layout)
    }

    fn allocate_zeroed(
        &self,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        <A as Allocator>::allocate_zeroed(*self, layout)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        unsafe { <A as Allocator>::reallocate(*self, ptr, layout) }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        unsafe { <A as Allocator>::free(*self, ptr) }
    }

    fn total_allocated(&self) -> usize {
        <A as Allocator>::total_allocated(*self)
    }

    fn total_freed(&self) -> usize {
        <A as Allocator>::total_freed(*self)
    }
}

/// Lifecycle shared by the arena-backed allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    Active,
    ShutDown,
}

/// Usage counters.
///
/// Written only while the owning allocator holds its lock, read without it.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    allocated: AtomicUsize,
    freed: AtomicUsize,
}

impl Stats {
    pub(crate) const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_alloc(&self, bytes: usize) {
        self.allocated.fetch_add(bytes, Ordering::Release);
    }

    pub(crate) fn record_free(&self, bytes: usize) {
        self.freed.fetch_add(bytes, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.freed.store(0, Ordering::Release);
        self.allocated.store(0, Ordering::Release);
    }

    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub(crate) fn freed(&self) -> usize {
        self.freed.load(Ordering::Acquire)
    }
}
