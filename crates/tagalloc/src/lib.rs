//! A boundary-tag heap allocator with an explicit free list.
//!
//! The heap manages a single contiguous arena that only ever grows, obtained
//! from an [`ArenaGrowth`] source in `sbrk` fashion. All bookkeeping lives in
//! the arena itself:
//!
//! - every block carries a one-word header holding its size, an allocated
//!   bit and a bit telling whether the block below it is allocated
//! - free blocks repeat their size in a footer word and hold the links of a
//!   doubly linked free list in their payload
//! - a prologue word at the start and an epilogue header at the end of the
//!   arena stop neighbour lookups from running off either edge
//!
//! ```text
//! ┌──────────┬─────┬─────────┬─────┬──────┬──────┬─────┬─────┬──────────┐
//! │ prologue │ hdr │ payload │ hdr │ prev │ next │ ... │ ftr │ epilogue │
//! └──────────┴─────┴─────────┴─────┴──────┴──────┴─────┴─────┴──────────┘
//!             allocated block              free block
//! ```
//!
//! Freed blocks are merged with free neighbours immediately, so no two free
//! blocks are ever adjacent. Allocation searches the free list from the head
//! and takes the smallest of the first few blocks that fit (see
//! [`HeapConfig::fit_candidates`]); when nothing fits the arena is extended by
//! at least [`HeapConfig::chunk_size`] bytes.
//!
//! Payloads are 16-byte aligned. The allocator targets 64-bit platforms.
//!
//! # Usage Example
//!
//! ```rust
//! use core::ptr::NonNull;
//!
//! use tagalloc::{BrkArena, Heap};
//!
//! // In a kernel this would be the memory reserved for the heap.
//! let mut memory = vec![0u128; 1024];
//! let start = NonNull::new(memory.as_mut_ptr()).unwrap().cast::<u8>();
//! let mut heap = Heap::new(unsafe { BrkArena::new(start, 16 * 1024) });
//!
//! let ptr = heap.allocate(100).unwrap();
//! assert_eq!(ptr.as_ptr().addr() % 16, 0);
//! assert!(heap.usable_size(ptr).unwrap() >= 100);
//!
//! let ptr = unsafe { heap.reallocate(ptr.as_ptr(), 300) }.unwrap();
//! unsafe { heap.deallocate(ptr.as_ptr()) };
//!
//! let summary = heap.verify().unwrap();
//! assert_eq!(summary.free_blocks, 1);
//! ```
//!
//! # Thread Safety
//!
//! [`Heap`] is `Send` but not `Sync`. [`LockedHeap`] puts it behind a spin
//! lock and implements [`GlobalAlloc`](core::alloc::GlobalAlloc).

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use brk_arena::{ArenaGrowth, BrkArena, GrowError};

pub use self::{
    check::{HeapCheckError, HeapSummary},
    config::HeapConfig,
    dump::HeapDump,
    error::{AllocError, ConfigError},
    heap::Heap,
    locked::LockedHeap,
    tag::{ALIGNMENT, BoundaryTag, MIN_BLOCK_SIZE, TagFlags, WORD_SIZE},
};

mod arena;
mod block;
mod check;
mod coalesce;
mod config;
mod dump;
mod error;
mod events;
mod fit;
mod free_list;
mod heap;
mod locked;
mod tag;

#[cfg(test)]
mod test_util;
