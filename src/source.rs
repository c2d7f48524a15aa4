use core::ptr::NonNull;

/// Granularity of every request made to a [`PageSource`].
pub const PAGE_SIZE: usize = 4096;

/// Number of whole pages needed to hold `bytes`.
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// A contiguous, page-aligned backing region handed out by a [`PageSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arena {
    base: NonNull<u8>,
    size: usize,
}

// An arena is a plain address range; exclusive ownership is tracked by
// whichever allocator holds it.
unsafe impl Send for Arena {}

impl Arena {
    /// # Safety
    ///
    /// `base..base + size` must be valid for reads and writes and must not be
    /// handed to anyone else while this arena is live.
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn pages(&self) -> usize {
        self.size / PAGE_SIZE
    }

    pub fn start_addr(&self) -> usize {
        self.base.as_ptr().addr()
    }

    pub fn end_addr(&self) -> usize {
        self.start_addr() + self.size
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start_addr() && addr < self.end_addr()
    }
}

/// A source of page-granular backing memory
pub trait PageSource {
    /// Request `count` contiguous pages.
    ///
    /// # Safety
    ///
    /// The arena must be returned with `free_pages` on the same source.
    unsafe fn allocate_pages(&mut self, count: usize) -> Option<Arena>;

    /// Return pages obtained from `allocate_pages`
    ///
    /// # Safety
    ///
    /// The arena must have come from this source and nothing may still point
    /// into it.
    unsafe fn free_pages(&mut self, arena: Arena);
}

impl<S: PageSource + ?Sized> PageSource for &mut S {
    unsafe fn allocate_pages(&mut self, count: usize) -> Option<Arena> {
        unsafe { <S as PageSource>::allocate_pages(&mut **self, count) }
    }

    unsafe fn free_pages(&mut self, arena: Arena) {
        unsafe { <S as PageSource>::free_pages(&mut **self, arena) }
    }
}

pub mod static_buff;

#[cfg(feature = "std")]
pub mod os_heap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn arena_bounds() {
        let mut buf = [0u8; 64];
        let base = NonNull::new(buf.as_mut_ptr()).unwrap();
        let arena = unsafe { Arena::from_raw_parts(base, 64) };

        assert!(arena.contains(arena.start_addr()));
        assert!(arena.contains(arena.end_addr() - 1));
        assert!(!arena.contains(arena.end_addr()));
        assert_eq!(arena.end_addr() - arena.start_addr(), 64);
    }
}
