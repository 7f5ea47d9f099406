//! Merging of address-adjacent free blocks.
//!
//! Whenever a block becomes free (deallocation, the remainder of a split, or
//! a freshly grown arena tail) it is merged with whichever neighbours are also
//! free, so that no two free blocks are ever adjacent.
//!
//! The left neighbour's status is read from this block's own prev-allocated
//! bit; its header is only reached through its footer once that bit says the
//! footer exists. The right neighbour always exists (at worst it is the
//! epilogue), so its header can be read directly.
//!
//! ```text
//!  left     block    right                 merged
//! ┌──────┬─────────┬───────┐          ┌──────────────────────┐
//! │ free │ freeing │ free  │   ──►    │         free         │
//! └──────┴─────────┴───────┘          └──────────────────────┘
//! ```

use crate::{arena::Arena, block::Block, free_list::FreeList};

/// Merges the free `block` with its free neighbours and links the result into
/// the free list.
///
/// `block` must already carry a free header and footer and must not be in the
/// free list. Returns the surviving block, which starts at the left
/// neighbour when that one was absorbed.
pub(crate) fn coalesce(arena: &mut Arena, free_list: &mut FreeList, block: Block) -> Block {
    let size = block.size(arena);
    let right = block.next(arena);

    let left_free = !block.is_prev_allocated(arena);
    let right_free = !right.is_allocated(arena);

    let (merged, merged_size) = match (left_free, right_free) {
        (false, false) => (block, size),
        (true, false) => {
            let left = block.prev(arena);
            free_list.remove(arena, left);
            (left, left.size(arena) + size)
        }
        (false, true) => {
            free_list.remove(arena, right);
            (block, size + right.size(arena))
        }
        (true, true) => {
            let left = block.prev(arena);
            free_list.remove(arena, left);
            free_list.remove(arena, right);
            (left, left.size(arena) + size + right.size(arena))
        }
    };

    // The block below the merged span is still whatever was below `merged`.
    let prev_allocated = merged.is_prev_allocated(arena);
    merged.write_header(arena, merged_size, false, prev_allocated);
    merged.write_footer(arena, merged_size, false);
    merged.next(arena).set_prev_allocated(arena, false);

    free_list.insert(arena, merged);
    merged
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::PROLOGUE,
        tag::BoundaryTag,
        test_util::with_test_memory,
    };

    const SIZES: [usize; 4] = [32, 48, 64, 80];

    // prologue | 32 | 48 | 64 | 80 | epilogue, all allocated.
    fn with_blocks<F>(test_fn: F)
    where
        F: FnOnce(&mut Arena, &mut FreeList, [Block; 4]),
    {
        let size = 16 + SIZES.iter().sum::<usize>();
        with_test_memory(size, |start, _| {
            let mut arena = unsafe { Arena::new(start, size) };
            arena.write(PROLOGUE, BoundaryTag::SENTINEL.to_word());
            let mut blocks = [Block::FIRST; 4];
            let mut block = Block::FIRST;
            for (i, &block_size) in SIZES.iter().enumerate() {
                block.write_header(&mut arena, block_size, true, true);
                blocks[i] = block;
                block = block.next(&arena);
            }
            arena.write(block.offset(), BoundaryTag::pack(0, true, true).to_word());
            test_fn(&mut arena, &mut FreeList::new(), blocks);
        });
    }

    // What `Heap::deallocate` does before handing the block over.
    fn mark_free(arena: &mut Arena, block: Block) {
        let size = block.size(arena);
        let prev_allocated = block.is_prev_allocated(arena);
        block.write_header(arena, size, false, prev_allocated);
        block.write_footer(arena, size, false);
    }

    fn free(arena: &mut Arena, free_list: &mut FreeList, block: Block) -> Block {
        mark_free(arena, block);
        coalesce(arena, free_list, block)
    }

    #[test]
    fn test_no_free_neighbours() {
        with_blocks(|arena, free_list, [_, b, c, _]| {
            let merged = free(arena, free_list, b);
            assert_eq!(merged, b);
            assert_eq!(merged.size(arena), 48);
            assert!(merged.is_prev_allocated(arena));
            assert!(!c.is_prev_allocated(arena));
            assert!(c.is_allocated(arena));
            assert_eq!(free_list.head(), Some(b));
        });
    }

    #[test]
    fn test_left_neighbour_free() {
        with_blocks(|arena, free_list, [a, b, c, _]| {
            free(arena, free_list, a);
            let merged = free(arena, free_list, b);
            assert_eq!(merged, a);
            assert_eq!(merged.size(arena), 80);
            assert!(merged.is_prev_allocated(arena));
            assert_eq!(arena.read(merged.footer(arena)), BoundaryTag::pack(80, false, false).to_word());
            assert!(!c.is_prev_allocated(arena));
            assert_eq!(free_list.iter(arena).collect::<Vec<_>>(), [a]);
        });
    }

    #[test]
    fn test_right_neighbour_free() {
        with_blocks(|arena, free_list, [_, b, c, d]| {
            free(arena, free_list, c);
            let merged = free(arena, free_list, b);
            assert_eq!(merged, b);
            assert_eq!(merged.size(arena), 112);
            assert!(merged.is_prev_allocated(arena));
            assert_eq!(merged.next(arena), d);
            assert!(!d.is_prev_allocated(arena));
            assert_eq!(free_list.iter(arena).collect::<Vec<_>>(), [b]);
        });
    }

    #[test]
    fn test_both_neighbours_free() {
        with_blocks(|arena, free_list, [a, b, c, d]| {
            free(arena, free_list, a);
            free(arena, free_list, c);
            assert_eq!(free_list.iter(arena).count(), 2);

            let merged = free(arena, free_list, b);
            assert_eq!(merged, a);
            assert_eq!(merged.size(arena), 144);
            assert_eq!(merged.next(arena), d);
            assert!(!d.is_prev_allocated(arena));
            assert_eq!(free_list.iter(arena).collect::<Vec<_>>(), [a]);
        });
    }

    #[test]
    fn test_merge_preserves_left_prev_allocated() {
        with_blocks(|arena, free_list, [a, b, c, d]| {
            // a stays allocated; b and c are merged, then d joins from the right.
            free(arena, free_list, b);
            let merged = free(arena, free_list, c);
            assert_eq!(merged, b);
            assert!(merged.is_prev_allocated(arena));
            assert!(a.is_allocated(arena));

            let merged = free(arena, free_list, d);
            assert_eq!(merged, b);
            assert_eq!(merged.size(arena), 48 + 64 + 80);
            assert!(merged.is_prev_allocated(arena));
            let epilogue = merged.next(arena);
            assert!(epilogue.header(arena).is_sentinel());
            assert!(!epilogue.is_prev_allocated(arena));
        });
    }
}
