//! Block geometry.
//!
//! A block is identified by the arena offset of its header word. Everything
//! else about it is derived from that offset and the header contents:
//!
//! ```text
//! Allocated block:
//! ┌────────┬──────────────────────────────────────────────┐
//! │ header │ payload (size - 8 bytes)                     │
//! └────────┴──────────────────────────────────────────────┘
//!
//! Free block:
//! ┌────────┬────────┬────────┬─────────────────┬────────┐
//! │ header │  prev  │  next  │     unused      │ footer │
//! └────────┴────────┴────────┴─────────────────┴────────┘
//!          ▲
//!          └── payload start, 16-byte aligned
//! ```
//!
//! The arena itself starts with a prologue word (a footer-only sentinel) so
//! that the first block header sits at offset 8 and its payload at offset 16.

use core::fmt;

use crate::{
    arena::Arena,
    tag::{BoundaryTag, WORD_SIZE},
};

/// Arena offset of the prologue sentinel.
pub(crate) const PROLOGUE: usize = 0;

/// Link value standing for "no block".
///
/// Offset 0 is the prologue, which is never a free block.
const NIL_LINK: usize = 0;

/// Arena offset of a block header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:#x})", self.0)
    }
}

impl Block {
    /// The block immediately after the prologue.
    pub(crate) const FIRST: Self = Self(PROLOGUE + WORD_SIZE);

    pub(crate) const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Returns the block owning the payload that starts at `payload`.
    pub(crate) const fn from_payload(payload: usize) -> Self {
        Self(payload - WORD_SIZE)
    }

    pub(crate) const fn offset(self) -> usize {
        self.0
    }

    pub(crate) const fn payload(self) -> usize {
        self.0 + WORD_SIZE
    }

    pub(crate) const fn is_first(self) -> bool {
        self.0 == Self::FIRST.0
    }

    pub(crate) fn header(self, arena: &Arena) -> BoundaryTag {
        BoundaryTag::from_word(arena.read(self.0))
    }

    pub(crate) fn size(self, arena: &Arena) -> usize {
        self.header(arena).size()
    }

    pub(crate) fn is_allocated(self, arena: &Arena) -> bool {
        self.header(arena).is_allocated()
    }

    pub(crate) fn is_prev_allocated(self, arena: &Arena) -> bool {
        self.header(arena).is_prev_allocated()
    }

    /// Bytes available to the caller while the block is allocated.
    pub(crate) fn payload_size(self, arena: &Arena) -> usize {
        self.size(arena) - WORD_SIZE
    }

    /// Arena offset of the last word of the block.
    pub(crate) fn footer(self, arena: &Arena) -> usize {
        self.0 + self.size(arena) - WORD_SIZE
    }

    /// The block that starts right where this one ends.
    pub(crate) fn next(self, arena: &Arena) -> Self {
        Self(self.0 + self.size(arena))
    }

    /// Arena offset of the word just below this header.
    ///
    /// This is the predecessor's footer only if the predecessor is free.
    pub(crate) const fn prev_footer(self) -> usize {
        self.0 - WORD_SIZE
    }

    /// The block that ends right where this one starts.
    ///
    /// Only valid while the predecessor is free: allocated blocks carry no
    /// footer to read the size from.
    pub(crate) fn prev(self, arena: &Arena) -> Self {
        debug_assert!(!self.is_first());
        debug_assert!(!self.is_prev_allocated(arena));
        let size = BoundaryTag::from_word(arena.read(self.prev_footer())).size();
        Self(self.0 - size)
    }

    pub(crate) fn write_header(
        self,
        arena: &mut Arena,
        size: usize,
        allocated: bool,
        prev_allocated: bool,
    ) {
        arena.write(
            self.0,
            BoundaryTag::pack(size, allocated, prev_allocated).to_word(),
        );
    }

    /// Writes the footer of a block spanning `size` bytes.
    pub(crate) fn write_footer(self, arena: &mut Arena, size: usize, allocated: bool) {
        arena.write(
            self.0 + size - WORD_SIZE,
            BoundaryTag::pack(size, allocated, false).to_word(),
        );
    }

    /// Updates only the prev-allocated bit of the header.
    pub(crate) fn set_prev_allocated(self, arena: &mut Arena, prev_allocated: bool) {
        let header = self.header(arena).with_prev_allocated(prev_allocated);
        arena.write(self.0, header.to_word());
    }

    pub(crate) const fn prev_link(self) -> usize {
        self.payload()
    }

    pub(crate) const fn next_link(self) -> usize {
        self.payload() + WORD_SIZE
    }

    pub(crate) const fn decode_link(word: usize) -> Option<Self> {
        if word == NIL_LINK {
            None
        } else {
            Some(Self(word))
        }
    }

    const fn encode_link(link: Option<Self>) -> usize {
        match link {
            Some(block) => block.0,
            None => NIL_LINK,
        }
    }

    /// Previous node in the free list. Meaningless unless the block is free.
    pub(crate) fn free_prev(self, arena: &Arena) -> Option<Self> {
        Self::decode_link(arena.read(self.prev_link()))
    }

    /// Next node in the free list. Meaningless unless the block is free.
    pub(crate) fn free_next(self, arena: &Arena) -> Option<Self> {
        Self::decode_link(arena.read(self.next_link()))
    }

    pub(crate) fn set_free_prev(self, arena: &mut Arena, prev: Option<Self>) {
        arena.write(self.prev_link(), Self::encode_link(prev));
    }

    pub(crate) fn set_free_next(self, arena: &mut Arena, next: Option<Self>) {
        arena.write(self.next_link(), Self::encode_link(next));
    }
}
