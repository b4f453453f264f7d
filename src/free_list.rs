use crate::{block::FreeLinks, heap::Heap, provider::GrowthProvider};

/// Doubly-linked list of free blocks, threaded through their payloads.
///
/// New entries go to the head (LIFO).
#[derive(Debug, Default)]
pub(crate) struct FreeList {
  head: Option<usize>,
}

impl FreeList {
  pub fn new() -> Self {
    Self { head: None }
  }

  pub fn head(&self) -> Option<usize> {
    self.head
  }

  pub fn clear(&mut self) {
    self.head = None;
  }

  pub fn push<P: GrowthProvider>(
    &mut self,
    heap: &mut Heap<P>,
    block: usize,
  ) {
    let links = FreeLinks {
      next: self.head,
      previous: None,
    };
    heap.write_links(block, &links);

    if let Some(head) = self.head {
      let mut head_links = heap.links(head);
      head_links.previous = Some(block);
      heap.write_links(head, &head_links);
    }

    self.head = Some(block);
  }

  pub fn remove<P: GrowthProvider>(
    &mut self,
    heap: &mut Heap<P>,
    block: usize,
  ) {
    let links = heap.links(block);

    match links.previous {
      Some(previous) => {
        let mut previous_links = heap.links(previous);
        previous_links.next = links.next;
        heap.write_links(previous, &previous_links);
      }
      None => self.head = links.next,
    }

    if let Some(next) = links.next {
      let mut next_links = heap.links(next);
      next_links.previous = links.previous;
      heap.write_links(next, &next_links);
    }
  }

  /// First entry, in list order, with at least `size` usable bytes.
  pub fn search<P: GrowthProvider>(
    &self,
    heap: &Heap<P>,
    size: usize,
  ) -> Option<usize> {
    let mut current = self.head;

    while let Some(block) = current {
      let header = heap.header(block);
      log::trace!("free list: visiting {:#x} ({} bytes)", block, header.size);

      if header.size >= size {
        return Some(block);
      }
      current = heap.links(block).next;
    }

    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    block::{BlockState, HEADER_SIZE, Header},
    provider::ArenaProvider,
  };

  fn free_heap(sizes: &[usize]) -> (Heap<ArenaProvider>, Vec<usize>) {
    let mut heap = Heap::new(ArenaProvider::new());
    let mut blocks = Vec::new();

    for &size in sizes {
      let block = heap.grow(HEADER_SIZE + size).unwrap();
      heap.write_header(block, &Header::new(size, BlockState::Free, heap.tail()));
      heap.set_tail(block);
      blocks.push(block);
    }

    (heap, blocks)
  }

  fn order(
    list: &FreeList,
    heap: &Heap<ArenaProvider>,
  ) -> Vec<usize> {
    let mut entries = Vec::new();
    let mut current = list.head();
    while let Some(block) = current {
      entries.push(block);
      current = heap.links(block).next;
    }
    entries
  }

  #[test]
  fn test_push_is_lifo() {
    let (mut heap, blocks) = free_heap(&[16, 32, 48]);
    let mut list = FreeList::new();

    for &block in &blocks {
      list.push(&mut heap, block);
    }

    assert_eq!(order(&list, &heap), vec![blocks[2], blocks[1], blocks[0]]);
    assert_eq!(heap.links(blocks[2]).previous, None);
    assert_eq!(heap.links(blocks[1]).previous, Some(blocks[2]));
  }

  #[test]
  fn test_remove_head_middle_and_last() {
    let (mut heap, blocks) = free_heap(&[16, 16, 16, 16]);
    let mut list = FreeList::new();
    for &block in &blocks {
      list.push(&mut heap, block);
    }

    list.remove(&mut heap, blocks[1]);
    assert_eq!(order(&list, &heap), vec![blocks[3], blocks[2], blocks[0]]);

    list.remove(&mut heap, blocks[3]);
    assert_eq!(order(&list, &heap), vec![blocks[2], blocks[0]]);
    assert_eq!(heap.links(blocks[2]).previous, None);

    list.remove(&mut heap, blocks[0]);
    assert_eq!(order(&list, &heap), vec![blocks[2]]);
    assert_eq!(heap.links(blocks[2]).next, None);

    list.remove(&mut heap, blocks[2]);
    assert_eq!(list.head(), None);
  }

  #[test]
  fn test_search_follows_list_order() {
    let (mut heap, blocks) = free_heap(&[64, 16, 64]);
    let mut list = FreeList::new();
    for &block in &blocks {
      list.push(&mut heap, block);
    }

    assert_eq!(list.search(&heap, 64), Some(blocks[2]));
    assert_eq!(list.search(&heap, 16), Some(blocks[2]));
    assert_eq!(list.search(&heap, 80), None);

    list.remove(&mut heap, blocks[2]);
    assert_eq!(list.search(&heap, 32), Some(blocks[0]));
  }
}
