//! Heap consistency checking and dumps.
//!
//! Nothing here is needed by `alloc` or `free`; these walk the block chain
//! and the free list to report what a broken invariant looks like.

use std::{collections::HashSet, fmt};

use log::{debug, error};
use thiserror::Error;

use crate::{
  align::ALIGNMENT,
  allocator::Allocator,
  block::{BlockState, HEADER_SIZE, MIN_PAYLOAD},
  provider::GrowthProvider,
};

/// One broken heap invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("block {block:#x}: previous link is {found:?}, expected {expected:?}")]
  BrokenPrevious {
    block: usize,
    expected: Option<usize>,
    found: Option<usize>,
  },

  #[error("block {block:#x}: size {size} is not a positive multiple of the alignment unit")]
  Misaligned { block: usize, size: usize },

  #[error("blocks account for {accounted} bytes but the heap holds {heap_size}")]
  Conservation { accounted: usize, heap_size: usize },

  #[error("blocks {first:#x} and {second:#x} are adjacent and both free")]
  AdjacentFree { first: usize, second: usize },

  #[error("tail marker is {found:?}, last block is {expected:?}")]
  TailMismatch {
    expected: Option<usize>,
    found: Option<usize>,
  },

  #[error("free list revisits block {block:#x}")]
  CircularFreeList { block: usize },

  #[error("free list entry {block:#x} is not a free block")]
  FreeListEntryNotFree { block: usize },

  #[error("free list entry {block:#x} links back to {found:?}, expected {expected:?}")]
  BrokenFreeLink {
    block: usize,
    expected: Option<usize>,
    found: Option<usize>,
  },

  #[error("{in_chain} free blocks in the heap but {in_list} on the free list")]
  FreeCountMismatch { in_chain: usize, in_list: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("heap check found {} violation(s)", .violations.len())]
pub struct Corruption {
  pub violations: Vec<Violation>,
}

/// Block and byte totals over the whole heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub blocks: usize,
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl<P: GrowthProvider> Allocator<P> {
  /// Verifies every structural invariant of the heap.
  ///
  /// Each violation is logged at `error` level and the full heap dump at
  /// `debug` level before returning.
  pub fn check(&self) -> Result<(), Corruption> {
    let mut violations = Vec::new();
    let mut free_blocks = HashSet::new();

    let mut last: Option<(usize, bool)> = None;
    let mut accounted = 0;

    for (block, header) in self.heap.blocks() {
      let expected = last.map(|(previous, _)| previous);
      if header.previous != expected {
        violations.push(Violation::BrokenPrevious {
          block,
          expected,
          found: header.previous,
        });
      }

      if header.size < MIN_PAYLOAD || header.size % ALIGNMENT != 0 {
        violations.push(Violation::Misaligned { block, size: header.size });
      }

      if let Some((previous, true)) = last {
        if header.is_free() {
          violations.push(Violation::AdjacentFree { first: previous, second: block });
        }
      }

      if header.is_free() {
        free_blocks.insert(block);
      }

      accounted += HEADER_SIZE + header.size;
      last = Some((block, header.is_free()));
    }

    if accounted != self.heap.size() {
      violations.push(Violation::Conservation {
        accounted,
        heap_size: self.heap.size(),
      });
    }

    let expected_tail = last.map(|(block, _)| block);
    if self.heap.tail() != expected_tail {
      violations.push(Violation::TailMismatch {
        expected: expected_tail,
        found: self.heap.tail(),
      });
    }

    let mut visited = HashSet::new();
    let mut previous = None;
    let mut current = self.free_list.head();

    while let Some(block) = current {
      if !visited.insert(block) {
        violations.push(Violation::CircularFreeList { block });
        break;
      }
      if !free_blocks.contains(&block) {
        violations.push(Violation::FreeListEntryNotFree { block });
        break;
      }
      if !self.heap.holds_links(block) {
        break;
      }

      let links = self.heap.links(block);
      if links.previous != previous {
        violations.push(Violation::BrokenFreeLink {
          block,
          expected: previous,
          found: links.previous,
        });
      }

      previous = Some(block);
      current = links.next;
    }

    let in_list = visited.len();
    if in_list != free_blocks.len() {
      violations.push(Violation::FreeCountMismatch {
        in_chain: free_blocks.len(),
        in_list,
      });
    }

    if violations.is_empty() {
      return Ok(());
    }

    for violation in &violations {
      error!("check: {}", violation);
    }
    debug!("{}", self.dump());

    Err(Corruption { violations })
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.heap.size(),
      ..HeapStats::default()
    };

    for (_, header) in self.heap.blocks() {
      stats.blocks += 1;

      match header.state {
        BlockState::Allocated => {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += header.size;
        }
        BlockState::Free => {
          stats.free_blocks += 1;
          stats.free_bytes += header.size;
          stats.largest_free = stats.largest_free.max(header.size);
        }
      }
    }

    stats
  }

  /// Printable listing of every block and of the free list.
  pub fn dump(&self) -> HeapDump<'_, P> {
    HeapDump { allocator: self }
  }
}

pub struct HeapDump<'a, P: GrowthProvider> {
  allocator: &'a Allocator<P>,
}

impl<P: GrowthProvider> fmt::Display for HeapDump<'_, P> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let heap = &self.allocator.heap;
    let free_list = &self.allocator.free_list;

    writeln!(f, "heap size:\t{:#x}", heap.size())?;
    writeln!(f, "tail:\t\t{}", Offset(heap.tail()))?;
    writeln!(f, "free list head:\t{}", Offset(free_list.head()))?;

    for (block, header) in heap.blocks() {
      write!(f, "{:#08x}: {:>8}\t", block, header.size)?;

      match header.state {
        BlockState::Allocated => writeln!(f, "ALLOCATED\tprevious: {}", Offset(header.previous))?,
        BlockState::Free if !heap.holds_links(block) => {
          writeln!(f, "FREE\t\tprevious: {}", Offset(header.previous))?
        }
        BlockState::Free => {
          let links = heap.links(block);
          writeln!(
            f,
            "FREE\t\tprevious: {}, next free: {}, previous free: {}",
            Offset(header.previous),
            Offset(links.next),
            Offset(links.previous)
          )?
        }
      }
    }
    writeln!(f, "END OF HEAP")?;

    write!(f, "head")?;
    let mut visited = HashSet::new();
    let mut current = free_list.head();
    while let Some(block) = current {
      write!(f, " -> {:#x}", block)?;
      if !visited.insert(block) {
        write!(f, " (cycle)")?;
        break;
      }
      if !heap.holds_links(block) {
        break;
      }
      current = heap.links(block).next;
    }

    writeln!(f)
  }
}

struct Offset(Option<usize>);

impl fmt::Display for Offset {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self.0 {
      Some(offset) => write!(f, "{:#x}", offset),
      None => write!(f, "none"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::ArenaProvider;
  use test_log::test;

  fn allocator() -> Allocator<ArenaProvider> {
    Allocator::new(ArenaProvider::new())
  }

  fn violations(allocator: &Allocator<ArenaProvider>) -> Vec<Violation> {
    allocator.check().unwrap_err().violations
  }

  #[test]
  fn test_empty_heap_is_consistent() {
    let allocator = allocator();

    assert_eq!(allocator.check(), Ok(()));
    assert_eq!(allocator.stats(), HeapStats::default());
  }

  #[test]
  fn test_detects_broken_previous() {
    let mut allocator = allocator();
    allocator.alloc(32).unwrap();
    allocator.alloc(32).unwrap();

    allocator.heap.set_previous(48, 100);

    assert_eq!(
      violations(&allocator),
      vec![Violation::BrokenPrevious {
        block: 48,
        expected: Some(0),
        found: Some(100)
      }]
    );
  }

  #[test]
  fn test_detects_unlisted_and_adjacent_free_blocks() {
    let mut allocator = allocator();
    allocator.alloc(32).unwrap();
    allocator.alloc(32).unwrap();

    for block in [0, 48] {
      let mut header = allocator.heap.header(block);
      header.state = BlockState::Free;
      allocator.heap.write_header(block, &header);
    }

    let found = violations(&allocator);
    assert!(found.contains(&Violation::AdjacentFree { first: 0, second: 48 }));
    assert!(found.contains(&Violation::FreeCountMismatch { in_chain: 2, in_list: 0 }));
  }

  #[test]
  fn test_detects_circular_free_list() {
    let mut allocator = allocator();
    let a = allocator.alloc(32).unwrap().unwrap();
    allocator.alloc(32).unwrap();
    let c = allocator.alloc(32).unwrap().unwrap();
    allocator.free(a);
    allocator.free(c);
    assert_eq!(allocator.check(), Ok(()));

    let mut links = allocator.heap.links(0);
    links.next = Some(96);
    allocator.heap.write_links(0, &links);

    assert_eq!(
      violations(&allocator),
      vec![Violation::CircularFreeList { block: 96 }]
    );
    assert!(allocator.dump().to_string().contains("(cycle)"));
  }

  #[test]
  fn test_detects_tail_mismatch() {
    let mut allocator = allocator();
    allocator.alloc(32).unwrap();
    allocator.alloc(32).unwrap();

    allocator.heap.set_tail(0);

    assert_eq!(
      violations(&allocator),
      vec![Violation::TailMismatch {
        expected: Some(48),
        found: Some(0)
      }]
    );
  }

  #[test]
  fn test_reports_truncated_block_without_panicking() {
    let mut allocator = allocator();
    allocator.alloc(16).unwrap();

    allocator.heap.bytes_mut()[..8].copy_from_slice(&9u64.to_ne_bytes());

    assert_eq!(
      violations(&allocator),
      vec![
        Violation::Misaligned { block: 0, size: 8 },
        Violation::Conservation {
          accounted: 24,
          heap_size: 32
        },
      ]
    );
    assert!(allocator.dump().to_string().contains("END OF HEAP"));
  }

  #[test]
  fn test_detects_allocated_block_on_free_list() {
    let mut allocator = allocator();
    let a = allocator.alloc(32).unwrap().unwrap();
    allocator.alloc(32).unwrap();
    allocator.free(a);

    let mut header = allocator.heap.header(0);
    header.state = BlockState::Allocated;
    allocator.heap.write_header(0, &header);

    assert_eq!(
      violations(&allocator),
      vec![
        Violation::FreeListEntryNotFree { block: 0 },
        Violation::FreeCountMismatch {
          in_chain: 0,
          in_list: 1
        },
      ]
    );
  }

  #[test]
  fn test_detects_broken_free_link() {
    let mut allocator = allocator();
    let a = allocator.alloc(32).unwrap().unwrap();
    allocator.alloc(32).unwrap();
    let c = allocator.alloc(32).unwrap().unwrap();
    allocator.free(a);
    allocator.free(c);

    let mut links = allocator.heap.links(0);
    assert_eq!(links.previous, Some(96));
    links.previous = None;
    allocator.heap.write_links(0, &links);

    assert_eq!(
      violations(&allocator),
      vec![Violation::BrokenFreeLink {
        block: 0,
        expected: Some(96),
        found: None
      }]
    );
  }

  #[test]
  fn test_detects_overrun() {
    let mut allocator = allocator();
    allocator.alloc(32).unwrap();
    allocator.alloc(32).unwrap();

    let mut header = allocator.heap.header(48);
    header.size = 64;
    allocator.heap.write_header(48, &header);

    assert_eq!(
      violations(&allocator),
      vec![Violation::Conservation {
        accounted: 128,
        heap_size: 96
      }]
    );
  }

  #[test]
  fn test_corruption_message() {
    let corruption = Corruption {
      violations: vec![Violation::CircularFreeList { block: 0x30 }],
    };

    assert_eq!(corruption.to_string(), "heap check found 1 violation(s)");
    assert_eq!(
      corruption.violations[0].to_string(),
      "free list revisits block 0x30"
    );
  }

  #[test]
  fn test_stats_and_dump() {
    let mut allocator = allocator();
    let a = allocator.alloc(64).unwrap().unwrap();
    allocator.alloc(16).unwrap();
    allocator.free(a);
    allocator.alloc(16).unwrap();

    assert_eq!(
      allocator.stats(),
      HeapStats {
        heap_size: 112,
        blocks: 3,
        allocated_blocks: 2,
        free_blocks: 1,
        allocated_bytes: 32,
        free_bytes: 32,
        largest_free: 32,
      }
    );

    let dump = allocator.dump().to_string();
    assert!(dump.starts_with("heap size:\t0x70\n"));
    assert!(dump.contains("ALLOCATED"));
    assert!(dump.contains("FREE"));
    assert!(dump.contains("END OF HEAP"));
    assert!(dump.ends_with("head -> 0x20\n"));
  }
}
