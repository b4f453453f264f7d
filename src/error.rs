use thiserror::Error;

/// Errors surfaced by [`Allocator`](crate::Allocator) operations.
///
/// All of them are fatal for the request that produced them: the allocator
/// has no fallback strategy once the heap cannot grow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
  #[error("could not grow the heap by {requested} bytes")]
  Growth {
    requested: usize,
    #[source]
    source: GrowthError,
  },

  #[error("request of {size} bytes overflows the heap address space")]
  SizeOverflow { size: usize },

  #[error("could not release the heap")]
  Reset {
    #[source]
    source: GrowthError,
  },
}

/// Failures reported by a [`GrowthProvider`](crate::GrowthProvider).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrowthError {
  #[error("backing region exhausted: {requested} more bytes would exceed the {limit} byte limit")]
  Exhausted { requested: usize, limit: usize },

  #[error("sbrk failed (errno {errno})")]
  Os { errno: i32 },

  #[error("new extent at offset {found:#x} is not contiguous with the heap end {expected:#x}")]
  NonContiguous { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
