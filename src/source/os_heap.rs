use std::alloc::{GlobalAlloc, Layout, System};

use core::ptr::NonNull;

use crate::source::{Arena, PAGE_SIZE, PageSource};

/// Pages from the operating system's allocator.
///
/// Goes through [`System`] directly, never the global allocator, so an
/// allocator built on `OsPages` can itself be installed as
/// `#[global_allocator]`.
#[derive(Debug, Default)]
pub struct OsPages {
    limit: Option<usize>,
    outstanding: usize,
}

impl OsPages {
    pub const fn new() -> Self {
        Self {
            limit: None,
            outstanding: 0,
        }
    }

    /// Refuse requests that would put more than `pages` pages in use.
    pub const fn with_limit(pages: usize) -> Self {
        Self {
            limit: Some(pages),
            outstanding: 0,
        }
    }

    /// Pages currently handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn layout(count: usize) -> Option<Layout> {
        let size = count.checked_mul(PAGE_SIZE)?;
        Layout::from_size_align(size, PAGE_SIZE).ok()
    }
}

impl PageSource for OsPages {
    unsafe fn allocate_pages(&mut self, count: usize) -> Option<Arena> {
        if count == 0 {
            return None;
        }

        let in_use = self.outstanding.checked_add(count)?;
        if self.limit.is_some_and(|limit| in_use > limit) {
            return None;
        }

        let layout = Self::layout(count)?;
        let base = NonNull::new(unsafe { System.alloc(layout) })?;
        self.outstanding = in_use;

        Some(unsafe { Arena::from_raw_parts(base, layout.size()) })
    }

    unsafe fn free_pages(&mut self, arena: Arena) {
        let Some(layout) = Self::layout(arena.pages()) else {
            return;
        };

        unsafe { System.dealloc(arena.base().as_ptr(), layout) };
        self.outstanding -= arena.pages();
    }
}
