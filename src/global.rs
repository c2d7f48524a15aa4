use core::{
    alloc::{GlobalAlloc, Layout},
    cmp,
    ptr::{self, NonNull},
};

use crate::allocator::{AllocError, Allocator};

/// Lets any [`Allocator`] back `#[global_allocator]`.
///
/// The wrapped allocator is initialized on first use; after that the lock-free
/// [`is_active`](Allocator::is_active) check keeps `initialize` off the
/// allocation path. Failures become null pointers, and strategies that cannot
/// resize fall back to allocate-copy-free.
///
/// ```ignore
/// #[global_allocator]
/// static HEAP: GlobalAdapter<FreeListAllocator<OsPages, SpinLock>> =
///     GlobalAdapter::new(FreeListAllocator::new(OsPages::new(), 1 << 26));
/// ```
pub struct GlobalAdapter<A> {
    inner: A,
}

impl<A: Allocator> GlobalAdapter<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &A {
        &self.inner
    }

    fn region(&self, zeroed: bool, layout: Layout) -> *mut u8 {
        if !self.inner.is_active() && self.inner.initialize().is_err() {
            return ptr::null_mut();
        }

        let region = if zeroed {
            self.inner.allocate_zeroed(layout)
        } else {
            self.inner.allocate(layout)
        };

        region.map_or(ptr::null_mut(), |p| p.cast::<u8>().as_ptr())
    }
}

unsafe impl<A: Allocator> GlobalAlloc for GlobalAdapter<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.region(false, layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.region(true, layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(p) = NonNull::new(ptr) {
            unsafe { self.inner.free(p) };
        }
    }

    unsafe fn realloc(
        &self,
        ptr: *mut u8,
        layout: Layout,
        new_size: usize,
    ) -> *mut u8 {
        let Some(p) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };
        let Ok(new_layout) = Layout::from_size_align(new_size, layout.align())
        else {
            return ptr::null_mut();
        };

        match unsafe { self.inner.reallocate(p, new_layout) } {
            Ok(moved) => moved.cast::<u8>().as_ptr(),
            Err(AllocError::Unsupported) => {
                let fresh = self.region(false, new_layout);
                if !fresh.is_null() {
                    unsafe {
                        ptr::copy_nonoverlapping(
                            ptr,
                            fresh,
                            cmp::min(layout.size(), new_size),
                        );
                        self.inner.free(p);
                    }
                }
                fresh
            }
            Err(_) => ptr::null_mut(),
        }
    }
}
