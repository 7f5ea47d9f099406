//! Diagnostics recorded during a request and logged after it.
//!
//! A heap behind [`LockedHeap`](crate::LockedHeap) may be the allocator the
//! logger itself allocates from, so nothing may be logged while the lock is
//! held. Requests record what happened into [`Events`] instead, and the
//! caller emits them once it has let go of the heap.

use arrayvec::ArrayVec;

/// A request initialises the heap at most once and grows the arena at most
/// twice: once for the first chunk and once for itself.
const MAX_EVENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Initialized { base: usize },
    Extended { bytes: usize, arena_len: usize },
}

#[derive(Debug, Default)]
pub(crate) struct Events(ArrayVec<Event, MAX_EVENTS>);

impl Events {
    pub(crate) fn new() -> Self {
        Self(ArrayVec::new())
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    pub(crate) fn emit(self) {
        for event in self.0 {
            match event {
                Event::Initialized { base } => log::trace!("heap initialised at {base:#x}"),
                Event::Extended { bytes, arena_len } => {
                    log::debug!("extended arena by {bytes} bytes to {arena_len} bytes");
                }
            }
        }
    }
}
