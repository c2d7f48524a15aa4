#![no_std]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod align;
pub mod allocator;
pub mod global;
pub mod mutex;
pub mod source;

pub use allocator::{
    AllocError, Allocator, bump::BumpAllocator, free_list::FreeListAllocator,
    strategy::AnyAllocator,
};
pub use source::{Arena, PAGE_SIZE, PageSource};
