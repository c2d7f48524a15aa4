use core::alloc::Layout;

use crate::allocator::AllocError;

/// Rounds `x` up to a multiple of `align`, or `None` past `usize::MAX`.
pub(crate) const fn checked_align_up(x: usize, align: usize) -> Option<usize> {
    match x.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

pub(crate) const fn is_aligned(x: usize, align: usize) -> bool {
    x & (align - 1) == 0
}

/// Builds the layout for a `(bytes, alignment)` request.
///
/// An alignment of `0` means the natural minimum. Any other alignment must be
/// a power of two.
pub fn request(bytes: usize, alignment: usize) -> Result<Layout, AllocError> {
    if bytes == 0 {
        return Err(AllocError::ZeroSized);
    }

    let align = if alignment == 0 { 1 } else { alignment };
    if !align.is_power_of_two() {
        return Err(AllocError::InvalidAlignment(alignment));
    }

    Layout::from_size_align(bytes, align).map_err(|_| AllocError::OutOfMemory)
}
