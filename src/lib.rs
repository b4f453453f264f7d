//! # firstfit - A First-Fit Heap Allocator
//!
//! This crate manages a single growable heap region with **first-fit**
//! placement, in-place **splitting** of oversized free blocks and
//! **coalescing** of freed blocks with their physical neighbours.
//!
//! ## Overview
//!
//! The heap is a chain of physically adjacent blocks. Every block is one
//! header followed by its payload, and the chain tiles the heap exactly:
//!
//! ```text
//!   Heap region (offsets grow to the right):
//!
//!   ┌────────┬──────────┬────────┬────────────┬────────┬──────────┐
//!   │ header │ payload  │ header │  payload   │ header │ payload  │
//!   │  A     │ (alloc)  │  B     │  (free)    │  C     │ (alloc)  │
//!   └────────┴──────────┴────────┴────────────┴────────┴──────────┘
//!   0        ▲                   ▲                     ▲      heap_size
//!            │                   │                     │
//!        returned            free links            returned
//!        to caller           live here             to caller
//!
//!   next(b)     = b + HEADER_SIZE + b.size
//!   previous(b) = stored in b's header
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   firstfit
//!   ├── align      - Alignment unit and the align! macro
//!   ├── block      - Header encoding (size, state, previous) and free links
//!   ├── provider   - GrowthProvider trait, Vec-backed and sbrk-backed regions
//!   ├── heap       - Block chain accessors (first, next, previous, grow)
//!   ├── free_list  - Doubly-linked list of free blocks only
//!   ├── allocator  - Allocator: init, alloc, free, split, coalesce
//!   ├── check      - Consistency checker, heap dump, statistics
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use firstfit::{Allocator, ArenaProvider};
//!
//! let mut allocator = Allocator::new(ArenaProvider::new());
//!
//! let a = allocator.alloc(64).unwrap().unwrap();
//! allocator.payload_mut(a)[..5].copy_from_slice(b"hello");
//!
//! let b = allocator.alloc(64).unwrap().unwrap();
//! allocator.free(a);
//!
//! // First fit hands the freed slot out again before growing the heap.
//! let c = allocator.alloc(32).unwrap().unwrap();
//! assert_eq!(c, a);
//!
//! allocator.free(b);
//! allocator.free(c);
//! assert!(allocator.check().is_ok());
//! assert_eq!(allocator.stats().free_blocks, 1);
//! ```
//!
//! ## How It Works
//!
//! `alloc` rounds the request up to [`ALIGNMENT`](align::ALIGNMENT) and
//! searches for a free block that is large enough. When the found block
//! leaves more than one header's worth of bytes, it is split:
//!
//! ```text
//!   Before:  ┌────────┬──────────────────────────────────────┐
//!            │ hdr    │               free (E)               │
//!            └────────┴──────────────────────────────────────┘
//!
//!   After:   ┌────────┬──────────────┬────────┬──────────────┐
//!            │ hdr    │  alloc (R)   │ hdr    │ free (E-R-H) │
//!            └────────┴──────────────┴────────┴──────────────┘
//! ```
//!
//! A remainder of `HEADER_SIZE` bytes or less stays inside the allocated
//! block as internal fragmentation. When nothing fits, the heap grows at its
//! end by exactly one header plus the rounded request.
//!
//! `free` marks the block free and merges it with a free successor and a
//! free predecessor, so no two adjacent blocks are ever both free:
//!
//! ```text
//!   ┌───────┬───────┬───────┐        ┌───────────────────────┐
//!   │ free  │ freed │ free  │  ───►  │         free          │
//!   └───────┴───────┴───────┘        └───────────────────────┘
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: every operation takes `&mut self`
//! - **No shrinking**: the heap never gives memory back except on `init`
//! - **No resizing**: there is no `realloc`/`calloc`
//! - **Unchecked frees**: freeing an address twice, or one that `alloc`
//!   never returned, corrupts the heap silently (a debug assertion catches
//!   the common double free)

pub mod align;
mod allocator;
mod block;
mod check;
mod error;
mod free_list;
mod heap;
mod provider;

pub use allocator::{Address, Allocator, SearchMode};
pub use block::{BlockState, HEADER_SIZE, MIN_PAYLOAD};
pub use check::{Corruption, HeapDump, HeapStats, Violation};
pub use error::{Error, GrowthError, Result};
pub use provider::{ArenaProvider, DEFAULT_LIMIT, GrowthProvider, SbrkProvider};
