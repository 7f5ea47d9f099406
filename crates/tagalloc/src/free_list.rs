//! Explicit free list.
//!
//! Free blocks are threaded into a doubly linked list through the first two
//! words of their payload. The list is unordered: blocks are pushed at the
//! head when they become free, so the head is always the most recently freed
//! block. Insertion and removal are O(1); searching is a linear walk.

use crate::{arena::Arena, block::Block};

#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn head(&self) -> Option<Block> {
        self.head
    }

    /// Pushes `block` at the head of the list.
    ///
    /// The block must be free and not already linked.
    pub(crate) fn insert(&mut self, arena: &mut Arena, block: Block) {
        debug_assert!(!block.is_allocated(arena));
        block.set_free_prev(arena, None);
        block.set_free_next(arena, self.head);
        if let Some(old_head) = self.head {
            old_head.set_free_prev(arena, Some(block));
        }
        self.head = Some(block);
    }

    /// Unlinks `block`, which must currently be in the list.
    pub(crate) fn remove(&mut self, arena: &mut Arena, block: Block) {
        let prev = block.free_prev(arena);
        let next = block.free_next(arena);
        match (prev, next) {
            (None, None) => {
                debug_assert_eq!(self.head, Some(block));
                self.head = None;
            }
            (None, Some(next)) => {
                debug_assert_eq!(self.head, Some(block));
                next.set_free_prev(arena, None);
                self.head = Some(next);
            }
            (Some(prev), None) => {
                prev.set_free_next(arena, None);
            }
            (Some(prev), Some(next)) => {
                prev.set_free_next(arena, Some(next));
                next.set_free_prev(arena, Some(prev));
            }
        }
    }

    /// Walks the list from the head.
    ///
    /// Relies on the list being acyclic; use the integrity checker on a heap
    /// that may be corrupt.
    pub(crate) fn iter<'a>(&self, arena: &'a Arena) -> Iter<'a> {
        Iter {
            arena,
            next: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    arena: &'a Arena,
    next: Option<Block>,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        self.next = block.free_next(self.arena);
        Some(block)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_test_memory;

    const BLOCK_SIZE: usize = 32;

    // Lays out `count` free 32-byte blocks back to back after the prologue.
    fn with_free_blocks<F>(count: usize, test_fn: F)
    where
        F: FnOnce(&mut Arena, &[Block]),
    {
        let size = 16 + count * BLOCK_SIZE;
        with_test_memory(size, |start, _| {
            let mut arena = unsafe { Arena::new(start, size) };
            let blocks = (0..count)
                .map(|i| {
                    let block = Block::from_offset(Block::FIRST.offset() + i * BLOCK_SIZE);
                    block.write_header(&mut arena, BLOCK_SIZE, false, true);
                    block.write_footer(&mut arena, BLOCK_SIZE, false);
                    block
                })
                .collect::<Vec<_>>();
            test_fn(&mut arena, &blocks);
        });
    }

    fn collect(list: &FreeList, arena: &Arena) -> Vec<Block> {
        list.iter(arena).collect()
    }

    fn assert_back_links(list: &FreeList, arena: &Arena) {
        let nodes = collect(list, arena);
        if let Some(head) = nodes.first() {
            assert_eq!(head.free_prev(arena), None);
        }
        for pair in nodes.windows(2) {
            assert_eq!(pair[1].free_prev(arena), Some(pair[0]));
        }
    }

    #[test]
    fn test_insert_is_lifo() {
        with_free_blocks(3, |arena, blocks| {
            let mut list = FreeList::new();
            assert_eq!(list.head(), None);
            for &block in blocks {
                list.insert(arena, block);
            }
            assert_eq!(collect(&list, arena), [blocks[2], blocks[1], blocks[0]]);
            assert_back_links(&list, arena);
        });
    }

    #[test]
    fn test_remove_sole_member() {
        with_free_blocks(1, |arena, blocks| {
            let mut list = FreeList::new();
            list.insert(arena, blocks[0]);
            list.remove(arena, blocks[0]);
            assert_eq!(list.head(), None);
            assert!(collect(&list, arena).is_empty());
        });
    }

    #[test]
    fn test_remove_head() {
        with_free_blocks(3, |arena, blocks| {
            let mut list = FreeList::new();
            for &block in blocks {
                list.insert(arena, block);
            }
            list.remove(arena, blocks[2]);
            assert_eq!(list.head(), Some(blocks[1]));
            assert_eq!(collect(&list, arena), [blocks[1], blocks[0]]);
            assert_back_links(&list, arena);
        });
    }

    #[test]
    fn test_remove_tail() {
        with_free_blocks(3, |arena, blocks| {
            let mut list = FreeList::new();
            for &block in blocks {
                list.insert(arena, block);
            }
            list.remove(arena, blocks[0]);
            assert_eq!(collect(&list, arena), [blocks[2], blocks[1]]);
            assert_back_links(&list, arena);
        });
    }

    #[test]
    fn test_remove_interior() {
        with_free_blocks(3, |arena, blocks| {
            let mut list = FreeList::new();
            for &block in blocks {
                list.insert(arena, block);
            }
            list.remove(arena, blocks[1]);
            assert_eq!(collect(&list, arena), [blocks[2], blocks[0]]);
            assert_back_links(&list, arena);
        });
    }

    #[test]
    fn test_reinsert_after_remove() {
        with_free_blocks(2, |arena, blocks| {
            let mut list = FreeList::new();
            list.insert(arena, blocks[0]);
            list.insert(arena, blocks[1]);
            list.remove(arena, blocks[0]);
            list.insert(arena, blocks[0]);
            assert_eq!(collect(&list, arena), [blocks[0], blocks[1]]);
            assert_back_links(&list, arena);
        });
    }
}
