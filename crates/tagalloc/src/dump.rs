use core::fmt;

use crate::{
    Heap,
    block::{Block, PROLOGUE},
    heap::Core,
    tag::BoundaryTag,
};

/// Free list entries printed before the dump gives up.
const MAX_LIST_ENTRIES: usize = 64;

/// Human-readable listing of every block of a [`Heap`].
///
/// Obtained with [`Heap::dump`]. Printing never panics, even on a corrupt
/// heap: the listing stops at the first word outside the arena.
pub struct HeapDump<'a> {
    core: Option<&'a Core>,
}

impl<G> Heap<G> {
    #[must_use]
    pub fn dump(&self) -> HeapDump<'_> {
        HeapDump {
            core: self.core.as_ref(),
        }
    }
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(core) = self.core else {
            return writeln!(f, "heap: not initialised");
        };
        let arena = &core.arena;
        let head = core.free_list.head();

        writeln!(f, "heap: {:p}, {:#x} bytes", arena.base(), arena.len())?;
        match arena.try_read(PROLOGUE) {
            Some(word) => writeln!(
                f,
                "  {PROLOGUE:#06x} prologue {:?}",
                BoundaryTag::from_word(word)
            )?,
            None => return writeln!(f, "  prologue unreadable"),
        }

        let mut block = Block::FIRST;
        loop {
            let offset = block.offset();
            let Some(word) = arena.try_read(offset) else {
                return writeln!(f, "  {offset:#06x} unreadable header, listing stops");
            };
            let header = BoundaryTag::from_word(word);
            if header.size() == 0 {
                writeln!(f, "  {offset:#06x} epilogue {header:?}")?;
                break;
            }

            write!(f, "  {offset:#06x} {header:?}")?;
            if !header.is_allocated() {
                let prev = arena.try_read(block.prev_link());
                let next = arena.try_read(block.next_link());
                write!(f, " links ")?;
                write_link(f, prev)?;
                write!(f, " <-> ")?;
                write_link(f, next)?;
                if head == Some(block) {
                    write!(f, " [head]")?;
                }
            }
            writeln!(f)?;

            let Some(next) = offset.checked_add(header.size()) else {
                return writeln!(f, "  size overflows the address space, listing stops");
            };
            block = Block::from_offset(next);
        }

        write!(f, "free list:")?;
        let mut node = head;
        for _ in 0..MAX_LIST_ENTRIES {
            let Some(current) = node else {
                return writeln!(f);
            };
            write!(f, " {:#x}", current.offset())?;
            node = arena
                .try_read(current.next_link())
                .and_then(Block::decode_link);
        }
        if node.is_some() {
            write!(f, " ...")?;
        }
        writeln!(f)
    }
}

fn write_link(f: &mut fmt::Formatter<'_>, link: Option<usize>) -> fmt::Result {
    match link {
        Some(0) => write!(f, "nil"),
        Some(word) => write!(f, "{word:#x}"),
        None => write!(f, "?"),
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_test_heap;

    #[test]
    fn test_uninitialized() {
        with_test_heap(4096, |heap| {
            assert_eq!(heap.dump().to_string(), "heap: not initialised\n");
        });
    }

    #[test]
    fn test_lists_blocks_and_free_list() {
        with_test_heap(4096, |heap| {
            let a = heap.allocate(56).unwrap();
            let _b = heap.allocate(56).unwrap();
            unsafe {
                heap.deallocate(a.as_ptr());
            }
            let dump = heap.dump().to_string();
            let lines = dump.lines().collect::<Vec<_>>();

            assert!(lines[0].starts_with("heap: 0x"));
            assert!(lines[0].ends_with(", 0x710 bytes"));
            assert!(lines[1].contains("prologue"));
            assert!(lines[2].starts_with("  0x0008 "));
            assert!(lines[2].ends_with("links nil <-> 0x88 [head]"));
            assert!(lines[3].starts_with("  0x0048 "));
            assert!(!lines[3].contains("links"));
            assert!(lines[4].starts_with("  0x0088 "));
            assert!(lines[4].ends_with("links 0x8 <-> nil"));
            assert!(lines[5].starts_with("  0x0708 epilogue"));
            assert_eq!(lines[6], "free list: 0x8 0x88");
            assert_eq!(lines.len(), 7);
        });
    }

    #[test]
    fn test_stops_at_cycle() {
        with_test_heap(4096, |heap| {
            heap.init().unwrap();
            let core = heap.core.as_mut().unwrap();
            let head = core.free_list.head().unwrap();
            head.set_free_next(&mut core.arena, Some(head));

            let dump = heap.dump().to_string();
            let last = dump.lines().last().unwrap();
            assert!(last.ends_with(" ..."));
            assert_eq!(last.matches("0x8").count(), MAX_LIST_ENTRIES);
        });
    }

    #[test]
    fn test_tolerates_corrupt_size() {
        with_test_heap(4096, |heap| {
            heap.init().unwrap();
            let core = heap.core.as_mut().unwrap();
            core.arena.write(
                Block::FIRST.offset(),
                BoundaryTag::pack(0x10_0000, true, true).to_word(),
            );

            let dump = heap.dump().to_string();
            assert!(dump.contains("unreadable header"));
            assert!(!heap.check_integrity());
        });
    }
}
