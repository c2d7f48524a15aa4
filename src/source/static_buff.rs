use core::{cell::UnsafeCell, mem::MaybeUninit, ptr::NonNull};

use crate::source::{Arena, PAGE_SIZE, PageSource};

#[repr(C, align(4096))]
struct PageAligned<const N: usize>(UnsafeCell<[MaybeUninit<u8>; N]>);

/// A fixed buffer of `N` bytes carved into pages front to back.
///
/// Freeing the most recently handed-out arena rolls the cursor back; any
/// other free is ignored and those pages stay consumed.
///
/// Arenas point into the buffer itself, so it must not move once pages have
/// been handed out: keep it in a `static` or lend it out as `&mut`.
pub struct StaticPages<const N: usize> {
    buffer: PageAligned<N>,
    offset: usize,
}

impl<const N: usize> PageSource for StaticPages<N> {
    unsafe fn allocate_pages(&mut self, count: usize) -> Option<Arena> {
        let size = count.checked_mul(PAGE_SIZE)?;
        let remaining = N - self.offset;

        if size == 0 || size > remaining {
            return None;
        }

        let start_ptr =
            unsafe { self.buffer.0.get().cast::<u8>().add(self.offset) };
        self.offset += size;

        let base = NonNull::new(start_ptr)?;
        Some(unsafe { Arena::from_raw_parts(base, size) })
    }

    unsafe fn free_pages(&mut self, arena: Arena) {
        let start = self.buffer.0.get().cast::<u8>().addr();
        if arena.end_addr() == start + self.offset {
            self.offset -= arena.size();
        }
    }
}

impl<const N: usize> StaticPages<N> {
    pub const fn new() -> Self {
        assert!(N % PAGE_SIZE == 0, "buffer must be a whole number of pages");
        Self {
            buffer: PageAligned(UnsafeCell::new([MaybeUninit::uninit(); N])),
            offset: 0,
        }
    }

    /// Pages not yet handed out.
    pub fn pages_left(&self) -> usize {
        (N - self.offset) / PAGE_SIZE
    }
}

impl<const N: usize> Default for StaticPages<N> {
    fn default() -> Self {
        Self::new()
    }
}
