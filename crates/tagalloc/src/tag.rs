//! Boundary tag encoding.
//!
//! Every block starts with a one-word header, and free blocks also end with
//! a one-word footer. Both words use the same packing:
//!
//! ```text
//!  63                                        4   3   2   1   0
//! ┌────────────────────────────────────────────┬───┬───┬───┬───┐
//! │             block size (bytes)             │ 0 │ 0 │ P │ A │
//! └────────────────────────────────────────────┴───┴───┴───┴───┘
//!   A: block is allocated
//!   P: the block immediately below in memory is allocated
//! ```
//!
//! Block sizes are multiples of 16, so the low four bits are always free for
//! flags.

use core::fmt;

use bitflags::bitflags;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("tagalloc manages 64-bit words and requires a 64-bit target");

/// Size of a header, footer or free-list link.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Block sizes and payload addresses are multiples of this.
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Header, footer and the two free-list links.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

const SIZE_MASK: usize = !0xF;

bitflags! {
    /// Status bits stored below the size field of a boundary tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagFlags: usize {
        /// The block is handed out to a caller.
        const ALLOCATED = 1 << 0;

        /// The preceding block in address order is allocated.
        ///
        /// Only meaningful in headers. Footers never carry it.
        const PREV_ALLOCATED = 1 << 1;
    }
}

/// One packed header or footer word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag(usize);

impl BoundaryTag {
    /// Tag of the zero-sized prologue and epilogue sentinels.
    pub const SENTINEL: Self = Self::pack(0, true, false);

    /// Packs a size and its status bits into one word.
    ///
    /// `size` must already be a multiple of 16; any low bits are discarded.
    #[must_use]
    pub const fn pack(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        debug_assert!(size & !SIZE_MASK == 0);
        let mut word = size & SIZE_MASK;
        if allocated {
            word |= TagFlags::ALLOCATED.bits();
        }
        if prev_allocated {
            word |= TagFlags::PREV_ALLOCATED.bits();
        }
        Self(word)
    }

    #[must_use]
    pub const fn from_word(word: usize) -> Self {
        Self(word)
    }

    #[must_use]
    pub const fn to_word(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn size(self) -> usize {
        self.0 & SIZE_MASK
    }

    #[must_use]
    pub const fn flags(self) -> TagFlags {
        TagFlags::from_bits_truncate(self.0)
    }

    #[must_use]
    pub const fn is_allocated(self) -> bool {
        self.flags().contains(TagFlags::ALLOCATED)
    }

    #[must_use]
    pub const fn is_prev_allocated(self) -> bool {
        self.flags().contains(TagFlags::PREV_ALLOCATED)
    }

    /// Returns the same tag with only the prev-allocated bit replaced.
    #[must_use]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        let bit = TagFlags::PREV_ALLOCATED.bits();
        if prev_allocated {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    /// Whether this is the size-0 allocated tag that marks either end of the
    /// heap.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.size() == 0 && self.is_allocated()
    }
}

impl fmt::Debug for BoundaryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryTag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .field("prev_allocated", &self.is_prev_allocated())
            .finish()
    }
}
