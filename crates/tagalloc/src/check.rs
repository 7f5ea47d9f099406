//! Heap integrity checking.
//!
//! [`Heap::verify`] walks the whole heap twice, once in address order over
//! the boundary tags and once along the free list, and reports the first
//! broken invariant. Every word is read through a bounds check, so a corrupt
//! heap produces an error rather than a wild access.

use core::cmp;

use snafu::{OptionExt as _, Snafu, ensure};
use snafu_utils::{Location, Report};

use crate::{
    Heap,
    block::{Block, PROLOGUE},
    heap::Core,
    tag::{ALIGNMENT, BoundaryTag, MIN_BLOCK_SIZE, WORD_SIZE},
};

/// Invariant violations found by [`Heap::verify`].
///
/// Offsets are relative to the start of the arena; `block` and `node` name
/// the offset of a block header.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapCheckError {
    #[snafu(display("prologue word {word:#x} is not a zero-sized allocated tag"))]
    Prologue {
        word: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("offset {offset:#x} is outside the arena of {arena_len:#x} bytes"))]
    OutOfBounds {
        offset: usize,
        arena_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {block:#x} has invalid size {size:#x}"))]
    BadSize {
        block: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "heap ends at {offset:#x}, expected an allocated epilogue at the last word of {arena_len:#x} bytes"
    ))]
    Epilogue {
        offset: usize,
        arena_len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "block at {block:#x} says prev-allocated is {actual}, but its predecessor is {}",
        if *expected { "allocated" } else { "free" }
    ))]
    PrevAllocated {
        block: usize,
        expected: bool,
        actual: bool,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "free block at {block:#x} has header {header:#x} but footer {footer:#x}"
    ))]
    Footer {
        block: usize,
        header: usize,
        footer: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free blocks at {block:#x} and {next:#x} are adjacent"))]
    AdjacentFree {
        block: usize,
        next: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list loops back through {node:#x}"))]
    ListCycle {
        node: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list node {node:#x} is not at a block boundary"))]
    ListNodeMisaligned {
        node: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list node {node:#x} is marked allocated"))]
    ListNodeAllocated {
        node: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list head {head:#x} has prev link {prev:#x}"))]
    ListHeadPrev {
        head: usize,
        prev: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "free list node {node:#x} links to {next:#x}, which links back to {back:#x}"
    ))]
    ListBackLink {
        node: usize,
        next: usize,
        back: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "free list holds {listed} blocks, but the heap has {walked} free blocks"
    ))]
    FreeCount {
        listed: usize,
        walked: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Block statistics of a heap that passed [`Heap::verify`].
///
/// Sizes are block sizes, headers and footers included.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapSummary {
    pub arena_len: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub largest_free: usize,
}

impl<G> Heap<G> {
    /// Checks every structural invariant of the heap.
    ///
    /// An uninitialised heap is trivially consistent and yields an empty
    /// summary.
    pub fn verify(&self) -> Result<HeapSummary, HeapCheckError> {
        match &self.core {
            Some(core) => Checker::new(core).run(),
            None => Ok(HeapSummary::default()),
        }
    }

    /// Runs [`verify`](Self::verify) and logs the failure, if any, together
    /// with a dump of the heap.
    pub fn check_integrity(&self) -> bool {
        match self.verify() {
            Ok(_) => true,
            Err(err) => {
                log::error!("heap integrity check failed: {}", Report::new(&err));
                log::debug!("{}", self.dump());
                false
            }
        }
    }
}

struct Checker<'a> {
    core: &'a Core,
}

impl<'a> Checker<'a> {
    fn new(core: &'a Core) -> Self {
        Self { core }
    }

    fn arena_len(&self) -> usize {
        self.core.arena.len()
    }

    fn read(&self, offset: usize) -> Result<usize, HeapCheckError> {
        self.core.arena.try_read(offset).context(OutOfBoundsSnafu {
            offset,
            arena_len: self.arena_len(),
        })
    }

    fn run(&self) -> Result<HeapSummary, HeapCheckError> {
        let summary = self.walk_blocks()?;
        self.walk_free_list(summary.free_blocks)?;
        Ok(summary)
    }

    fn walk_blocks(&self) -> Result<HeapSummary, HeapCheckError> {
        let arena_len = self.arena_len();
        let word = self.read(PROLOGUE)?;
        ensure!(
            word == BoundaryTag::SENTINEL.to_word(),
            PrologueSnafu { word }
        );

        let mut summary = HeapSummary {
            arena_len,
            ..HeapSummary::default()
        };
        let mut block = Block::FIRST;
        let mut prev: Option<(Block, bool)> = None;

        loop {
            let offset = block.offset();
            let header = BoundaryTag::from_word(self.read(offset)?);

            // The prologue counts as allocated.
            let expected = prev.is_none_or(|(_, allocated)| allocated);
            ensure!(
                header.is_prev_allocated() == expected,
                PrevAllocatedSnafu {
                    block: offset,
                    expected,
                    actual: header.is_prev_allocated(),
                }
            );

            let size = header.size();
            if size == 0 {
                ensure!(
                    header.is_allocated() && offset + WORD_SIZE == arena_len,
                    EpilogueSnafu { offset, arena_len }
                );
                return Ok(summary);
            }
            // Room must remain for at least the epilogue behind the block.
            ensure!(
                size >= MIN_BLOCK_SIZE
                    && size.is_multiple_of(ALIGNMENT)
                    && size <= arena_len - WORD_SIZE - offset,
                BadSizeSnafu {
                    block: offset,
                    size
                }
            );

            summary.blocks += 1;
            if header.is_allocated() {
                summary.allocated_bytes += size;
            } else {
                let footer = self.read(block.footer(&self.core.arena))?;
                ensure!(
                    footer == BoundaryTag::pack(size, false, false).to_word(),
                    FooterSnafu {
                        block: offset,
                        header: header.to_word(),
                        footer,
                    }
                );
                if let Some((prev, false)) = prev {
                    return AdjacentFreeSnafu {
                        block: prev.offset(),
                        next: offset,
                    }
                    .fail();
                }
                summary.free_blocks += 1;
                summary.free_bytes += size;
                summary.largest_free = cmp::max(summary.largest_free, size);
            }

            prev = Some((block, header.is_allocated()));
            block = Block::from_offset(offset + size);
        }
    }

    /// Validates `node` as a free-list member and returns its successor.
    fn list_next(&self, node: Block) -> Result<Option<Block>, HeapCheckError> {
        let offset = node.offset();
        ensure!(
            offset >= Block::FIRST.offset() && offset % ALIGNMENT == WORD_SIZE,
            ListNodeMisalignedSnafu { node: offset }
        );
        let header = BoundaryTag::from_word(self.read(offset)?);
        ensure!(
            !header.is_allocated(),
            ListNodeAllocatedSnafu { node: offset }
        );
        Ok(Block::decode_link(self.read(node.next_link())?))
    }

    fn walk_free_list(&self, walked: usize) -> Result<(), HeapCheckError> {
        let Some(head) = self.core.free_list.head() else {
            ensure!(walked == 0, FreeCountSnafu { listed: 0_usize, walked });
            return Ok(());
        };

        // Floyd's cycle detection first, so the counting walk below ends.
        let mut slow = head;
        let mut fast = head;
        loop {
            let Some(next) = self.list_next(fast)? else {
                break;
            };
            let Some(next) = self.list_next(next)? else {
                break;
            };
            fast = next;
            slow = self.list_next(slow)?.context(ListCycleSnafu {
                node: slow.offset(),
            })?;
            ensure!(slow != fast, ListCycleSnafu { node: slow.offset() });
        }

        let prev = self.read(head.prev_link())?;
        ensure!(
            Block::decode_link(prev).is_none(),
            ListHeadPrevSnafu {
                head: head.offset(),
                prev,
            }
        );

        let mut listed = 0;
        let mut node = Some(head);
        while let Some(current) = node {
            listed += 1;
            let next = self.list_next(current)?;
            if let Some(next) = next {
                let back = self.read(next.prev_link())?;
                ensure!(
                    back == current.offset(),
                    ListBackLinkSnafu {
                        node: current.offset(),
                        next: next.offset(),
                        back,
                    }
                );
            }
            node = next;
        }

        ensure!(listed == walked, FreeCountSnafu { listed, walked });
        Ok(())
    }
}
