use std::{io, ptr, slice};

use libc::{c_void, intptr_t, sbrk};
use log::debug;

use crate::{align, error::GrowthError};

/// Default byte limit of an [`ArenaProvider`] (20 MiB).
pub const DEFAULT_LIMIT: usize = 20 * (1 << 20);

/// Supplies the contiguous byte region the allocator carves blocks from.
///
/// The region only ever grows at its end. Offsets handed out by
/// [`grow`](GrowthProvider::grow) stay valid until [`reset`](GrowthProvider::reset).
pub trait GrowthProvider {
  /// Appends `bytes` bytes and returns the offset of the first new one.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, GrowthError>;

  /// Drops everything handed out so far.
  fn reset(&mut self) -> Result<(), GrowthError>;

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];
}

/// In-process region backed by a `Vec<u8>`, capped at a fixed size.
#[derive(Debug, Clone)]
pub struct ArenaProvider {
  memory: Vec<u8>,
  limit: usize,
}

impl ArenaProvider {
  pub fn new() -> Self {
    Self::with_limit(DEFAULT_LIMIT)
  }

  pub fn with_limit(limit: usize) -> Self {
    Self {
      memory: Vec::new(),
      limit,
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Default for ArenaProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl GrowthProvider for ArenaProvider {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, GrowthError> {
    let offset = self.memory.len();

    match offset.checked_add(bytes) {
      Some(end) if end <= self.limit => {
        self.memory.resize(end, 0);
        Ok(offset)
      }
      _ => Err(GrowthError::Exhausted {
        requested: bytes,
        limit: self.limit,
      }),
    }
  }

  fn reset(&mut self) -> Result<(), GrowthError> {
    self.memory.clear();
    Ok(())
  }

  fn bytes(&self) -> &[u8] {
    &self.memory
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.memory
  }
}

/// Region at the program break, grown with `sbrk(2)`.
///
/// The break is shared with anything else in the process that calls `brk`
/// or `sbrk` (including the system allocator), so growth fails with
/// [`GrowthError::NonContiguous`] whenever someone else moved it in between.
pub struct SbrkProvider {
  base: *mut u8,
  len: usize,
}

impl SbrkProvider {
  pub fn new() -> Self {
    Self {
      base: ptr::null_mut(),
      len: 0,
    }
  }

  /// Current program break, as reported by `sbrk(0)`.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  fn start(&mut self) -> Result<(), GrowthError> {
    let current = Self::program_break();
    if current as usize == usize::MAX {
      return Err(last_os_error());
    }

    let padding = align!(current as usize) - current as usize;
    if padding > 0 {
      let address = unsafe { sbrk(padding as intptr_t) };
      if address == usize::MAX as *mut c_void {
        return Err(last_os_error());
      }
    }

    self.base = current.wrapping_add(padding);
    debug!("sbrk region starts at {:?} ({} bytes of padding)", self.base, padding);

    Ok(())
  }
}

impl Default for SbrkProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl GrowthProvider for SbrkProvider {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, GrowthError> {
    let increment = intptr_t::try_from(bytes).map_err(|_| GrowthError::Exhausted {
      requested: bytes,
      limit: intptr_t::MAX as usize,
    })?;

    if self.base.is_null() {
      self.start()?;
    }

    let address = unsafe { sbrk(increment) };
    if address == usize::MAX as *mut c_void {
      return Err(last_os_error());
    }

    let expected = self.base as usize + self.len;
    if address as usize != expected {
      // Give back what we just took if nobody stacked on top of it.
      let taken = (address as *mut u8).wrapping_add(bytes);
      if Self::program_break() == taken {
        unsafe { sbrk(-increment) };
      }

      return Err(GrowthError::NonContiguous {
        expected: self.len,
        found: (address as usize).wrapping_sub(self.base as usize),
      });
    }

    let offset = self.len;
    self.len += bytes;

    Ok(offset)
  }

  fn reset(&mut self) -> Result<(), GrowthError> {
    if self.base.is_null() {
      return Ok(());
    }

    // Only hand the bytes back if nothing was stacked on top of our region.
    let end = self.base.wrapping_add(self.len);
    if self.len > 0 && Self::program_break() == end {
      let address = unsafe { sbrk(-(self.len as intptr_t)) };
      if address == usize::MAX as *mut c_void {
        return Err(last_os_error());
      }
    }

    self.base = ptr::null_mut();
    self.len = 0;

    Ok(())
  }

  fn bytes(&self) -> &[u8] {
    if self.base.is_null() {
      return &[];
    }

    unsafe { slice::from_raw_parts(self.base, self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.base.is_null() {
      return &mut [];
    }

    unsafe { slice::from_raw_parts_mut(self.base, self.len) }
  }
}

fn last_os_error() -> GrowthError {
  GrowthError::Os {
    errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::ALIGNMENT;

  #[test]
  fn test_arena_grows_contiguously() {
    let mut arena = ArenaProvider::with_limit(256);

    assert_eq!(arena.grow(32), Ok(0));
    assert_eq!(arena.grow(64), Ok(32));
    assert_eq!(arena.grow(16), Ok(96));
    assert_eq!(arena.bytes().len(), 112);

    arena.bytes_mut()[100] = 7;
    assert_eq!(arena.bytes()[100], 7);
  }

  #[test]
  fn test_arena_limit() {
    let mut arena = ArenaProvider::with_limit(64);

    assert_eq!(arena.grow(48), Ok(0));
    assert_eq!(
      arena.grow(32),
      Err(GrowthError::Exhausted {
        requested: 32,
        limit: 64
      })
    );
    assert_eq!(
      arena.grow(usize::MAX),
      Err(GrowthError::Exhausted {
        requested: usize::MAX,
        limit: 64
      })
    );
    assert_eq!(arena.bytes().len(), 48);
    assert_eq!(arena.grow(16), Ok(48));
  }

  #[test]
  fn test_arena_reset() {
    let mut arena = ArenaProvider::new();

    arena.grow(128).unwrap();
    arena.reset().unwrap();

    assert!(arena.bytes().is_empty());
    assert_eq!(arena.grow(16), Ok(0));
    assert_eq!(arena.limit(), DEFAULT_LIMIT);
  }

  #[test]
  #[ignore = "moves the process break shared with the system allocator"]
  fn test_sbrk_grows_at_program_break() {
    let mut provider = SbrkProvider::new();

    let first = provider.grow(64).unwrap();
    let second = provider.grow(32).unwrap();
    assert_eq!(first, 0);
    assert_eq!(second, 64);

    let base = provider.bytes().as_ptr();
    assert_eq!(base as usize % ALIGNMENT, 0);
    assert_eq!(SbrkProvider::program_break(), base.wrapping_add(96) as *mut u8);

    provider.bytes_mut().fill(0xAB);
    assert!(provider.bytes().iter().all(|&byte| byte == 0xAB));

    provider.reset().unwrap();
    assert!(provider.bytes().is_empty());
  }

  #[test]
  #[ignore = "moves the process break shared with the system allocator"]
  fn test_sbrk_returns_bytes_of_non_contiguous_extent() {
    let mut provider = SbrkProvider::new();
    provider.grow(32).unwrap();

    unsafe { sbrk(16) };
    let before = SbrkProvider::program_break();

    assert!(matches!(
      provider.grow(64),
      Err(GrowthError::NonContiguous { expected: 32, .. })
    ));
    assert_eq!(SbrkProvider::program_break(), before);
    assert_eq!(provider.bytes().len(), 32);
  }
}
