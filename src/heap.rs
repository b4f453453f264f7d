use log::debug;

use crate::{
  block::{FreeLinks, HEADER_SIZE, Header, MIN_PAYLOAD},
  error::{Error, GrowthError, Result},
  provider::GrowthProvider,
};

/// The block chain laid over a provider's region.
///
/// Blocks are addressed by the offset of their header. They tile
/// `[0, size)` with no gaps: each block is followed by the one at
/// `offset + HEADER_SIZE + header.size`.
pub(crate) struct Heap<P> {
  provider: P,
  size: usize,
  tail: Option<usize>,
}

impl<P: GrowthProvider> Heap<P> {
  pub fn new(provider: P) -> Self {
    Self {
      provider,
      size: 0,
      tail: None,
    }
  }

  pub fn reset(&mut self) -> std::result::Result<(), GrowthError> {
    self.provider.reset()?;
    self.size = 0;
    self.tail = None;

    Ok(())
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Last block in physical order.
  pub fn tail(&self) -> Option<usize> {
    self.tail
  }

  pub fn set_tail(
    &mut self,
    block: usize,
  ) {
    self.tail = Some(block);
  }

  pub fn first(&self) -> Option<usize> {
    (self.size > 0).then_some(0)
  }

  /// Block following `block`, if a whole header still fits before the heap
  /// end.
  pub fn next(
    &self,
    block: usize,
  ) -> Option<usize> {
    let next = block.checked_add(HEADER_SIZE)?.checked_add(self.header(block).size)?;
    let end = next.checked_add(HEADER_SIZE)?;
    (end <= self.size).then_some(next)
  }

  pub fn previous(
    &self,
    block: usize,
  ) -> Option<usize> {
    self.header(block).previous
  }

  pub fn header(
    &self,
    block: usize,
  ) -> Header {
    Header::read(self.provider.bytes(), block)
  }

  pub fn write_header(
    &mut self,
    block: usize,
    header: &Header,
  ) {
    header.write(self.provider.bytes_mut(), block);
  }

  pub fn set_previous(
    &mut self,
    block: usize,
    previous: usize,
  ) {
    let mut header = self.header(block);
    header.previous = Some(previous);
    self.write_header(block, &header);
  }

  /// Whether `block` is large enough, and far enough from the heap end, to
  /// carry free links.
  pub fn holds_links(
    &self,
    block: usize,
  ) -> bool {
    if self.header(block).size < MIN_PAYLOAD {
      return false;
    }

    block
      .checked_add(HEADER_SIZE + MIN_PAYLOAD)
      .is_some_and(|end| end <= self.size)
  }

  pub fn links(
    &self,
    block: usize,
  ) -> FreeLinks {
    FreeLinks::read(self.provider.bytes(), block)
  }

  pub fn write_links(
    &mut self,
    block: usize,
    links: &FreeLinks,
  ) {
    links.write(self.provider.bytes_mut(), block);
  }

  pub fn payload(
    &self,
    block: usize,
  ) -> &[u8] {
    let start = block + HEADER_SIZE;
    &self.provider.bytes()[start..start + self.header(block).size]
  }

  pub fn payload_mut(
    &mut self,
    block: usize,
  ) -> &mut [u8] {
    let start = block + HEADER_SIZE;
    let end = start + self.header(block).size;
    &mut self.provider.bytes_mut()[start..end]
  }

  #[cfg(test)]
  pub fn bytes_mut(&mut self) -> &mut [u8] {
    self.provider.bytes_mut()
  }

  /// Appends `bytes` bytes at the heap end and returns their offset.
  ///
  /// The caller is responsible for writing a header there.
  pub fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let offset = self
      .provider
      .grow(bytes)
      .map_err(|source| Error::Growth { requested: bytes, source })?;

    if offset != self.size {
      return Err(Error::Growth {
        requested: bytes,
        source: GrowthError::NonContiguous {
          expected: self.size,
          found: offset,
        },
      });
    }

    self.size += bytes;
    debug!("heap grew by {} bytes at {:#x}, heap size = {}", bytes, offset, self.size);

    Ok(offset)
  }

  /// Walks every block in address order.
  pub fn blocks(&self) -> Blocks<'_, P> {
    Blocks {
      heap: self,
      current: self.first(),
    }
  }
}

pub(crate) struct Blocks<'a, P> {
  heap: &'a Heap<P>,
  current: Option<usize>,
}

impl<P: GrowthProvider> Iterator for Blocks<'_, P> {
  type Item = (usize, Header);

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.current?;
    self.current = self.heap.next(block);

    Some((block, self.heap.header(block)))
  }
}
