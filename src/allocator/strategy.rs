use core::{alloc::Layout, ptr::NonNull};

use crate::{
    allocator::{
        AllocError, Allocator, bump::BumpAllocator,
        free_list::FreeListAllocator,
    },
    mutex::{DefaultLock, LockPolicy},
    source::PageSource,
};

/// Which allocation policy an [`AnyAllocator`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Bump,
    FreeList,
}

/// One of the built-in allocators, picked at construction time.
///
/// Dispatch is a `match`, not a vtable.
pub enum AnyAllocator<S: PageSource, L: LockPolicy = DefaultLock> {
    Bump(BumpAllocator<S, L>),
    FreeList(FreeListAllocator<S, L>),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            AnyAllocator::Bump($a) => $body,
            AnyAllocator::FreeList($a) => $body,
        }
    };
}

impl<S: PageSource, L: LockPolicy> AnyAllocator<S, L> {
    pub fn new(strategy: Strategy, source: S, capacity: usize) -> Self {
        match strategy {
            Strategy::Bump => Self::Bump(BumpAllocator::new(source, capacity)),
            Strategy::FreeList => {
                Self::FreeList(FreeListAllocator::new(source, capacity))
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Bump(_) => Strategy::Bump,
            Self::FreeList(_) => Strategy::FreeList,
        }
    }
}

impl<S: PageSource, L: LockPolicy> Allocator for AnyAllocator<S, L> {
    fn initialize(&self) -> Result<(), AllocError> {
        dispatch!(self, a => a.initialize())
    }

    fn shutdown(&self) {
        dispatch!(self, a => a.shutdown())
    }

    fn is_active(&self) -> bool {
        dispatch!(self, a => a.is_active())
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        dispatch!(self, a => a.allocate(layout))
    }

    fn allocate_zeroed(
        &self,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        dispatch!(self, a => a.allocate_zeroed(layout))
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        dispatch!(self, a => unsafe { a.reallocate(ptr, layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        dispatch!(self, a => unsafe { a.free(ptr) })
    }

    fn total_allocated(&self) -> usize {
        dispatch!(self, a => a.total_allocated())
    }

    fn total_freed(&self) -> usize {
        dispatch!(self, a => a.total_freed())
    }
}
