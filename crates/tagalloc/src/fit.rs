//! Fit selection.
//!
//! The free list is walked from the head and the smallest block that can hold
//! the request is remembered. The walk stops after a fixed number of blocks
//! large enough for the request have been seen, so a search costs at most that
//! many candidates plus the undersized blocks skipped in between.

use crate::{arena::Arena, block::Block, free_list::FreeList};

/// Returns the smallest of the first `candidates` free blocks of at least
/// `size` bytes, or `None` if no free block is large enough.
///
/// Ties go to the block closer to the head of the list.
pub(crate) fn find_fit(
    arena: &Arena,
    free_list: &FreeList,
    size: usize,
    candidates: usize,
) -> Option<Block> {
    free_list
        .iter(arena)
        .filter(|block| block.size(arena) >= size)
        .take(candidates)
        .min_by_key(|block| block.size(arena))
}
