use log::{debug, trace};

use crate::{
  align::checked_align,
  block::{BlockState, HEADER_SIZE, Header},
  error::{Error, Result},
  free_list::FreeList,
  heap::Heap,
  provider::GrowthProvider,
};

/// How [`Allocator::alloc`] looks for a reusable free block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
  /// Address-order scan over every block in the heap. The first free block
  /// that is large enough wins.
  #[default]
  FirstFit,
  /// Scan over free blocks only, most recently freed first.
  FreeList,
}

/// Payload offset returned by [`Allocator::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
  /// Byte offset of the payload from the start of the heap.
  pub fn offset(self) -> usize {
    self.0
  }

  fn block(self) -> usize {
    self.0 - HEADER_SIZE
  }

  fn of(block: usize) -> Self {
    Self(block + HEADER_SIZE)
  }
}

/// First-fit allocator with block splitting and bidirectional coalescing.
///
/// Single-threaded: every operation takes `&mut self` and restores all heap
/// invariants before returning.
pub struct Allocator<P: GrowthProvider> {
  pub(crate) heap: Heap<P>,
  pub(crate) free_list: FreeList,
  mode: SearchMode,
}

impl<P: GrowthProvider> Allocator<P> {
  pub fn new(provider: P) -> Self {
    Self::with_mode(provider, SearchMode::default())
  }

  pub fn with_mode(
    provider: P,
    mode: SearchMode,
  ) -> Self {
    Self {
      heap: Heap::new(provider),
      free_list: FreeList::new(),
      mode,
    }
  }

  /// Empties the heap. Every address handed out so far becomes invalid.
  pub fn init(&mut self) -> Result<()> {
    self.heap.reset().map_err(|source| Error::Reset { source })?;
    self.free_list.clear();
    debug!("allocator initialized ({:?})", self.mode);

    Ok(())
  }

  /// Allocates at least `size` bytes.
  ///
  /// Returns `Ok(None)` for a zero-sized request. The returned payload is
  /// aligned to [`ALIGNMENT`](crate::align::ALIGNMENT) relative to the heap
  /// start.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<Option<Address>> {
    if size == 0 {
      trace!("alloc(0) -> none");
      return Ok(None);
    }

    let size = checked_align(size)
      .filter(|aligned| aligned.checked_add(HEADER_SIZE).is_some())
      .ok_or(Error::SizeOverflow { size })?;

    let block = match self.search(size) {
      Some(block) => {
        self.place(block, size);
        block
      }
      None => self.extend(size)?,
    };

    debug!("alloc({}) -> {:#x}", size, block);

    Ok(Some(Address::of(block)))
  }

  /// Releases a block returned by [`alloc`](Self::alloc).
  ///
  /// Passing an address that is not currently allocated corrupts the heap.
  pub fn free(
    &mut self,
    address: Address,
  ) {
    let block = address.block();
    let mut header = self.heap.header(block);
    debug_assert_eq!(
      header.state,
      BlockState::Allocated,
      "free of a block that is not allocated: {:#x}",
      block
    );

    header.state = BlockState::Free;
    self.heap.write_header(block, &header);
    self.free_list.push(&mut self.heap, block);

    let covering = self.coalesce(block);
    debug!(
      "free({:#x}) -> {:#x} holds {} free bytes",
      block,
      covering,
      self.heap.header(covering).size
    );
  }

  pub fn payload(
    &self,
    address: Address,
  ) -> &[u8] {
    self.heap.payload(address.block())
  }

  pub fn payload_mut(
    &mut self,
    address: Address,
  ) -> &mut [u8] {
    self.heap.payload_mut(address.block())
  }

  /// Bytes the caller may use at `address`; at least what was requested.
  pub fn usable_size(
    &self,
    address: Address,
  ) -> usize {
    self.heap.header(address.block()).size
  }

  pub fn heap_size(&self) -> usize {
    self.heap.size()
  }

  pub fn search_mode(&self) -> SearchMode {
    self.mode
  }

  pub fn provider(&self) -> &P {
    self.heap.provider()
  }

  fn search(
    &self,
    size: usize,
  ) -> Option<usize> {
    match self.mode {
      SearchMode::FirstFit => self.search_chain(size),
      SearchMode::FreeList => self.free_list.search(&self.heap, size),
    }
  }

  fn search_chain(
    &self,
    size: usize,
  ) -> Option<usize> {
    self
      .heap
      .blocks()
      .inspect(|(block, header)| {
        trace!("chain: visiting {:#x} ({:?}, {} bytes)", block, header.state, header.size)
      })
      .find(|(_, header)| header.is_free() && header.size >= size)
      .map(|(block, _)| block)
  }

  /// Marks the free `block` allocated for `size` bytes, splitting off the
  /// remainder when it can hold a block of its own.
  fn place(
    &mut self,
    block: usize,
    size: usize,
  ) {
    let mut header = self.heap.header(block);
    self.free_list.remove(&mut self.heap, block);

    let remainder = header.size - size;
    header.state = BlockState::Allocated;

    if remainder <= HEADER_SIZE {
      debug!("reusing {:#x} whole ({} bytes, {} wasted)", block, header.size, remainder);
      self.heap.write_header(block, &header);
      return;
    }

    header.size = size;
    self.heap.write_header(block, &header);

    let split = block + HEADER_SIZE + size;
    let rest = Header::new(remainder - HEADER_SIZE, BlockState::Free, Some(block));
    self.heap.write_header(split, &rest);

    match self.heap.next(split) {
      Some(next) => self.heap.set_previous(next, split),
      None => self.heap.set_tail(split),
    }
    self.free_list.push(&mut self.heap, split);

    debug!("split {:#x}: {} bytes allocated, {:#x} keeps {} free", block, size, split, rest.size);
  }

  /// Appends a new allocated block of `size` bytes at the heap end.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<usize> {
    let block = self.heap.grow(size + HEADER_SIZE)?;

    let header = Header::new(size, BlockState::Allocated, self.heap.tail());
    self.heap.write_header(block, &header);
    self.heap.set_tail(block);

    Ok(block)
  }

  /// Merges the free `block` with free physical neighbours on both sides.
  ///
  /// Returns the block that now covers the freed bytes.
  fn coalesce(
    &mut self,
    block: usize,
  ) -> usize {
    let mut header = self.heap.header(block);

    if let Some(next) = self.heap.next(block) {
      let absorbed = self.heap.header(next);

      if absorbed.is_free() {
        self.free_list.remove(&mut self.heap, next);
        header.size += HEADER_SIZE + absorbed.size;
        self.heap.write_header(block, &header);

        match self.heap.next(block) {
          Some(after) => self.heap.set_previous(after, block),
          None => self.heap.set_tail(block),
        }
        debug!("merged {:#x} into {:#x} -> {} bytes", next, block, header.size);
      }
    }

    let Some(previous) = self.heap.previous(block) else {
      return block;
    };
    let mut merged = self.heap.header(previous);
    if !merged.is_free() {
      return block;
    }

    self.free_list.remove(&mut self.heap, block);
    merged.size += HEADER_SIZE + header.size;
    self.heap.write_header(previous, &merged);

    match self.heap.next(previous) {
      Some(after) => self.heap.set_previous(after, previous),
      None => self.heap.set_tail(previous),
    }
    debug!("merged {:#x} into {:#x} -> {} bytes", block, previous, merged.size);

    previous
  }
}
