//! Word-level access to the managed address range.
//!
//! All metadata lives inside the arena itself, so every header, footer and
//! free-list link is read and written through an offset from the arena start.
//! Offsets are checked against the current arena length before memory is
//! touched; a corrupt size field therefore stops the heap with a panic instead
//! of scribbling outside the arena.

use core::ptr::NonNull;

use brk_arena::ArenaGrowth;
use snafu::{ResultExt as _, ensure};

use crate::{
    error::{AllocError, GrowSnafu, NonContiguousSnafu},
    tag::WORD_SIZE,
};

/// The contiguous range of memory obtained from an [`ArenaGrowth`] source.
#[derive(Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    /// Wraps the first span returned by the growth source.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes and owned by
    /// the arena, and `base` must be word aligned.
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends `bytes` to the arena and returns the previous length.
    ///
    /// The growth source must hand back the span that starts right at the
    /// current end; anything else is rejected and the arena is left as is.
    pub(crate) fn grow<G>(&mut self, growth: &mut G, bytes: usize) -> Result<usize, AllocError>
    where
        G: ArenaGrowth + ?Sized,
    {
        let span = growth.extend(bytes).context(GrowSnafu { bytes })?;
        let expected = self.base.as_ptr().addr() + self.len;
        let actual = span.as_ptr().addr();
        ensure!(actual == expected, NonContiguousSnafu { expected, actual });

        let old_len = self.len;
        self.len += bytes;
        Ok(old_len)
    }

    fn contains_word(&self, offset: usize) -> bool {
        offset.is_multiple_of(WORD_SIZE)
            && offset
                .checked_add(WORD_SIZE)
                .is_some_and(|end| end <= self.len)
    }

    #[expect(clippy::cast_ptr_alignment)]
    fn word_ptr(&self, offset: usize) -> *mut usize {
        assert!(
            self.contains_word(offset),
            "word offset {offset:#x} outside arena of {:#x} bytes",
            self.len
        );
        unsafe { self.base.as_ptr().add(offset).cast::<usize>() }
    }

    /// Reads the word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word is not entirely inside the arena or misaligned.
    pub(crate) fn read(&self, offset: usize) -> usize {
        unsafe { self.word_ptr(offset).read() }
    }

    /// Writes the word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word is not entirely inside the arena or misaligned.
    pub(crate) fn write(&mut self, offset: usize, word: usize) {
        unsafe { self.word_ptr(offset).write(word) }
    }

    /// Reads the word at `offset`, or `None` if it lies outside the arena.
    pub(crate) fn try_read(&self, offset: usize) -> Option<usize> {
        self.contains_word(offset).then(|| self.read(offset))
    }

    /// Converts an arena offset into an address.
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len);
        unsafe { self.base.add(offset) }
    }

    /// Converts an address into an arena offset, if it lies inside the arena.
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        ptr.as_ptr()
            .addr()
            .checked_sub(self.base.as_ptr().addr())
            .filter(|offset| *offset < self.len)
    }
}
