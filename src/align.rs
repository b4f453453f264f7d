use std::mem;

/// Alignment unit of every block size and payload offset.
///
/// A free block stores two 64-bit links in its payload, so no payload can be
/// smaller than that pair. Aligning to the same unit keeps every payload large
/// enough to be freed later.
pub const ALIGNMENT: usize = 2 * mem::size_of::<u64>();

/// Rounds a size up to the allocator's alignment unit, or to an explicit
/// power-of-two unit.
///
/// # Examples
///
/// ```rust
/// use firstfit::{align, align::ALIGNMENT};
///
/// assert_eq!(ALIGNMENT, 16);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(17), 32);
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(9, 8), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align!($value, $crate::align::ALIGNMENT)
  };
  ($value:expr, $unit:expr) => {
    ($value + $unit - 1) & !($unit - 1)
  };
}

/// Same rounding as [`align!`], but `None` when the result would not fit in
/// a `usize`.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(padded) => Some(padded & !(ALIGNMENT - 1)),
    None => None,
  }
}
