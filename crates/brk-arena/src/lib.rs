//! Break-pointer arenas that grow monotonically.
//!
//! A heap built on this crate never asks for memory at arbitrary addresses:
//! it asks its [`ArenaGrowth`] source to move the break forward by some
//! number of bytes and receives the start of the newly appended span. This
//! mirrors the classic `sbrk(2)` contract without touching the process data
//! segment.
//!
//! [`BrkArena`] implements the contract over a fixed, caller-supplied memory
//! region. Once the region is used up every further request fails, which
//! makes it suitable both as a bounded kernel heap and as a deterministic
//! backing store in tests.
//!
//! ```text
//!  start                    brk                        start + capacity
//!    │                       │                                 │
//!    ▼                       ▼                                 ▼
//!    ┌───────────────────────┬─────────────────────────────────┐
//!    │   handed out (len)    │        remaining()              │
//!    └───────────────────────┴─────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use core::ptr::NonNull;
//!
//! use brk_arena::{ArenaGrowth as _, BrkArena};
//!
//! let mut region = vec![0u128; 64]; // 1024 bytes, 16-byte aligned
//! let start = NonNull::new(region.as_mut_ptr().cast::<u8>()).unwrap();
//! let mut arena = unsafe { BrkArena::new(start, 1024) };
//!
//! let first = arena.extend(256).unwrap();
//! let second = arena.extend(256).unwrap();
//! assert_eq!(first, start);
//! assert_eq!(second.as_ptr().addr(), start.as_ptr().addr() + 256);
//! assert!(arena.extend(1024).is_err());
//! assert_eq!(arena.len(), 512);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::ptr::NonNull;

use snafu::{Snafu, ensure};
use snafu_utils::Location;

#[derive(Debug, Snafu)]
pub enum GrowError {
    #[snafu(display("arena exhausted: requested {requested} bytes, {available} available"))]
    Exhausted {
        requested: usize,
        available: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A source of contiguous address space that can only grow.
///
/// # Safety
///
/// Implementors must guarantee that every successful [`extend`] call:
///
/// - returns a span of exactly `increment` bytes that is valid for reads and
///   writes and not accessed by anyone but the caller
/// - starts exactly where the previously returned span ended
/// - is derived from the same allocation as every earlier span, so that
///   pointers into the first span may be offset into later ones
/// - stays valid for as long as the implementor itself is alive
///
/// [`extend`]: ArenaGrowth::extend
pub unsafe trait ArenaGrowth {
    /// Moves the break forward by `increment` bytes and returns the old break.
    ///
    /// An `increment` of zero returns the current break without growing.
    /// On failure the break does not move.
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError>;
}

unsafe impl<G> ArenaGrowth for &mut G
where
    G: ArenaGrowth + ?Sized,
{
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).extend(increment)
    }
}

/// Break-pointer arena over a fixed memory region.
#[derive(Debug)]
pub struct BrkArena {
    start: NonNull<u8>,
    len: usize,
    capacity: usize,
}

unsafe impl Send for BrkArena {}

impl BrkArena {
    /// Creates an arena handing out `start..start + capacity`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - The memory region `start..start + capacity` is valid for reads and
    ///   writes
    /// - The memory region is not used by any other allocator or code
    /// - The memory region outlives the arena and everything allocated from
    ///   it
    #[must_use]
    pub const unsafe fn new(start: NonNull<u8>, capacity: usize) -> Self {
        Self {
            start,
            len: 0,
            capacity,
        }
    }

    /// Returns the lowest address of the region.
    #[must_use]
    pub fn start(&self) -> NonNull<u8> {
        self.start
    }

    /// Returns the current break, one past the last byte handed out.
    #[must_use]
    pub fn brk(&self) -> NonNull<u8> {
        unsafe { self.start.add(self.len) }
    }

    /// Returns the number of bytes handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// Moves the break back to the start of the region.
    ///
    /// # Safety
    ///
    /// Nothing may still refer to memory handed out by this arena. In
    /// particular any heap built on top of it must have been dropped.
    pub unsafe fn reset(&mut self) {
        self.len = 0;
    }
}

unsafe impl ArenaGrowth for BrkArena {
    fn extend(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError> {
        let available = self.remaining();
        ensure!(
            increment <= available,
            ExhaustedSnafu {
                requested: increment,
                available,
            }
        );
        let old_brk = self.brk();
        self.len += increment;
        Ok(old_brk)
    }
}
