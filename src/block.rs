use std::mem;

use crate::align::ALIGNMENT;

const WORD: usize = mem::size_of::<u64>();

/// Bytes taken by a block header: the size/state word and the previous word.
pub const HEADER_SIZE: usize = 2 * WORD;

/// Smallest payload a block may have; a free block keeps its links there.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

const NONE: u64 = u64::MAX;
const ALLOCATED_BIT: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Free,
  Allocated,
}

/// Decoded block header.
///
/// On the heap the state lives in bit 0 of the size word. Sizes are always a
/// multiple of [`ALIGNMENT`], so that bit is never part of the size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  /// Usable payload bytes following the header.
  pub size: usize,
  pub state: BlockState,
  /// Offset of the physically preceding block.
  pub previous: Option<usize>,
}

impl Header {
  pub fn new(
    size: usize,
    state: BlockState,
    previous: Option<usize>,
  ) -> Self {
    Self { size, state, previous }
  }

  pub fn is_free(&self) -> bool {
    self.state == BlockState::Free
  }

  pub fn read(
    bytes: &[u8],
    at: usize,
  ) -> Self {
    let word = read_word(bytes, at);
    let state = if word & ALLOCATED_BIT == 0 {
      BlockState::Free
    } else {
      BlockState::Allocated
    };

    Self {
      size: (word & !ALLOCATED_BIT) as usize,
      state,
      previous: decode_offset(read_word(bytes, at + WORD)),
    }
  }

  pub fn write(
    &self,
    bytes: &mut [u8],
    at: usize,
  ) {
    debug_assert_eq!(self.size % ALIGNMENT, 0, "block size {} is not aligned", self.size);

    let tag = match self.state {
      BlockState::Free => 0,
      BlockState::Allocated => ALLOCATED_BIT,
    };
    write_word(bytes, at, self.size as u64 | tag);
    write_word(bytes, at + WORD, encode_offset(self.previous));
  }
}

/// Free-list links, stored in the first two payload words of a free block.
///
/// Only meaningful while the block is free: once allocated, the caller's data
/// overwrites them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeLinks {
  pub next: Option<usize>,
  pub previous: Option<usize>,
}

impl FreeLinks {
  pub fn read(
    bytes: &[u8],
    block: usize,
  ) -> Self {
    let at = block + HEADER_SIZE;

    Self {
      next: decode_offset(read_word(bytes, at)),
      previous: decode_offset(read_word(bytes, at + WORD)),
    }
  }

  pub fn write(
    &self,
    bytes: &mut [u8],
    block: usize,
  ) {
    let at = block + HEADER_SIZE;

    write_word(bytes, at, encode_offset(self.next));
    write_word(bytes, at + WORD, encode_offset(self.previous));
  }
}

fn read_word(
  bytes: &[u8],
  at: usize,
) -> u64 {
  let mut word = [0u8; WORD];
  word.copy_from_slice(&bytes[at..at + WORD]);
  u64::from_ne_bytes(word)
}

fn write_word(
  bytes: &mut [u8],
  at: usize,
  value: u64,
) {
  bytes[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
}

fn encode_offset(offset: Option<usize>) -> u64 {
  offset.map_or(NONE, |offset| offset as u64)
}

fn decode_offset(word: u64) -> Option<usize> {
  (word != NONE).then_some(word as usize)
}
