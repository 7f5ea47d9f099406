//! The allocator context and its public operations.

use core::{
    cmp,
    ptr::{self, NonNull},
};

use brk_arena::ArenaGrowth;
use snafu::{OptionExt as _, ResultExt as _, ensure};
use snafu_utils::Report;

use crate::{
    HeapConfig,
    arena::Arena,
    block::{Block, PROLOGUE},
    coalesce::coalesce,
    error::{
        AllocError, CountOverflowSnafu, GrowSnafu, MisalignedArenaSnafu, NotLiveSnafu,
        SizeOverflowSnafu, ZeroSizeSnafu,
    },
    events::{Event, Events},
    fit::find_fit,
    free_list::FreeList,
    tag::{ALIGNMENT, BoundaryTag, MIN_BLOCK_SIZE, WORD_SIZE},
};

/// A boundary-tag heap over one growable arena.
///
/// The heap owns its [`ArenaGrowth`] source and obtains memory from it on
/// demand: a small sentinel area plus one chunk when first used, then more
/// whenever no free block can satisfy a request. The arena never shrinks.
///
/// # Thread Safety
///
/// The heap is `Send` but not `Sync`. All operations take `&mut self`; wrap
/// it in [`LockedHeap`](crate::LockedHeap) to share it between threads.
pub struct Heap<G> {
    growth: G,
    config: HeapConfig,
    pub(crate) core: Option<Core>,
}

unsafe impl<G> Send for Heap<G> where G: Send {}

/// Heap state that exists once the sentinels are in place.
#[derive(Debug)]
pub(crate) struct Core {
    pub(crate) arena: Arena,
    pub(crate) free_list: FreeList,
}

impl<G> Heap<G> {
    /// Creates a heap with the default [`HeapConfig`].
    ///
    /// No memory is requested until the first allocation or an explicit
    /// [`init`](Self::init).
    #[must_use]
    pub const fn new(growth: G) -> Self {
        Self::with_config(growth, HeapConfig::new())
    }

    #[must_use]
    pub const fn with_config(growth: G, config: HeapConfig) -> Self {
        Self {
            growth,
            config,
            core: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn growth(&self) -> &G {
        &self.growth
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    /// Number of bytes obtained from the growth source so far.
    #[must_use]
    pub fn arena_len(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.arena.len())
    }

    /// Returns how many bytes the caller may use behind `ptr`.
    ///
    /// `None` if `ptr` is not a live allocation of this heap.
    #[must_use]
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let core = self.core.as_ref()?;
        let block = core.owned_block(ptr)?;
        Some(block.payload_size(&core.arena))
    }
}

impl<G> Heap<G>
where
    G: ArenaGrowth,
{
    /// Sets up the sentinels and the first free chunk.
    ///
    /// Calling this is optional; every allocation initialises the heap on
    /// demand. Returns immediately if the heap is already initialised.
    ///
    /// If the sentinels fit but the first chunk does not, the heap stays
    /// initialised and empty and the error is returned.
    pub fn init(&mut self) -> Result<(), AllocError> {
        self.logged(|heap, events| {
            let Self {
                growth,
                config,
                core,
            } = heap;
            initialized(growth, core, config, events)?;
            Ok(())
        })
    }

    /// Allocates at least `size` bytes aligned to 16 bytes.
    ///
    /// Returns `None` if `size` is zero or the arena cannot grow enough.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).inspect_err(log_failure).ok()
    }

    /// Like [`allocate`](Self::allocate), but tells why it failed.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.logged(|heap, events| heap.allocate_deferred(size, events))
    }

    /// Allocates `count * size` zeroed bytes.
    ///
    /// Returns `None` if the product overflows, is zero, or the arena cannot
    /// grow enough.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate_zeroed(count, size)
            .inspect_err(log_failure)
            .ok()
    }

    /// Like [`allocate_zeroed`](Self::allocate_zeroed), but tells why it
    /// failed.
    pub fn try_allocate_zeroed(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        self.logged(|heap, events| heap.allocate_zeroed_deferred(count, size, events))
    }

    /// Returns an allocation to the heap.
    ///
    /// A null `ptr` is ignored. Pointers that are obviously not live
    /// allocations of this heap (outside the arena, misaligned, or whose
    /// block is already free) are logged and ignored as well.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` is null or was returned by this heap and has not been
    ///   deallocated since
    /// - The memory behind `ptr` is not accessed after deallocation
    ///
    /// The checks above catch some violations, not all of them.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if let Err(err) = unsafe { self.try_deallocate(ptr) } {
            log_failure(&err);
        }
    }

    /// Like [`deallocate`](Self::deallocate), but hands back the rejection
    /// of a pointer that is not a live allocation instead of logging it.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate).
    pub unsafe fn try_deallocate(&mut self, ptr: *mut u8) -> Result<(), AllocError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        let addr = ptr.as_ptr().addr();
        let core = self.core.as_mut().context(NotLiveSnafu { addr })?;
        let block = core.owned_block(ptr).context(NotLiveSnafu { addr })?;
        core.free(block);
        Ok(())
    }

    /// Resizes an allocation by moving it.
    ///
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - A null `ptr` behaves like [`allocate`](Self::allocate).
    /// - Otherwise a new block is allocated, the first `min(size, old size)`
    ///   bytes are copied over and the old block is freed. If the new block
    ///   cannot be allocated, `None` is returned and `ptr` stays valid and
    ///   unchanged.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate). On success `ptr` must no
    /// longer be used.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        unsafe { self.try_reallocate(ptr, size) }
            .inspect_err(log_failure)
            .ok()
            .flatten()
    }

    /// Like [`reallocate`](Self::reallocate), but tells why it failed.
    ///
    /// `Ok(None)` means `size` was zero and `ptr` has been freed.
    ///
    /// # Safety
    ///
    /// Same as [`reallocate`](Self::reallocate).
    pub unsafe fn try_reallocate(
        &mut self,
        ptr: *mut u8,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        self.logged(|heap, events| unsafe { heap.reallocate_deferred(ptr, size, events) })
    }

    /// Runs `request` and logs what it recorded once it has returned.
    fn logged<T>(&mut self, request: impl FnOnce(&mut Self, &mut Events) -> T) -> T {
        let mut events = Events::new();
        let output = request(self, &mut events);
        events.emit();
        output
    }

    /// Serves an allocation without logging; init and arena growth are
    /// recorded into `events`.
    pub(crate) fn allocate_deferred(
        &mut self,
        size: usize,
        events: &mut Events,
    ) -> Result<NonNull<u8>, AllocError> {
        ensure!(size != 0, ZeroSizeSnafu);
        let block_size = block_size_for(size).context(SizeOverflowSnafu { size })?;

        let Self {
            growth,
            config,
            core,
        } = self;
        let core = initialized(growth, core, config, events)?;

        let fit = find_fit(
            &core.arena,
            &core.free_list,
            block_size,
            config.fit_candidates(),
        );
        let block = match fit {
            Some(block) => block,
            None => core.extend(growth, cmp::max(block_size, config.chunk_size()), events)?,
        };
        core.place(block, block_size);

        Ok(core.arena.ptr_at(block.payload()))
    }

    pub(crate) fn allocate_zeroed_deferred(
        &mut self,
        count: usize,
        size: usize,
        events: &mut Events,
    ) -> Result<NonNull<u8>, AllocError> {
        let total = count
            .checked_mul(size)
            .context(CountOverflowSnafu { count, size })?;
        let ptr = self.allocate_deferred(total, events)?;
        unsafe {
            ptr.write_bytes(0, total);
        }
        Ok(ptr)
    }

    /// # Safety
    ///
    /// Same as [`reallocate`](Self::reallocate).
    pub(crate) unsafe fn reallocate_deferred(
        &mut self,
        ptr: *mut u8,
        size: usize,
        events: &mut Events,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if size == 0 {
            unsafe { self.try_deallocate(ptr)? };
            return Ok(None);
        }
        let Some(old) = NonNull::new(ptr) else {
            return self.allocate_deferred(size, events).map(Some);
        };
        let old_size = self.usable_size(old).context(NotLiveSnafu {
            addr: old.as_ptr().addr(),
        })?;

        let new = self.allocate_deferred(size, events)?;
        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), cmp::min(size, old_size));
            self.try_deallocate(old.as_ptr())?;
        }
        Ok(Some(new))
    }
}

/// Logs a failed request. Zero-sized requests are not worth a warning.
pub(crate) fn log_failure(err: &AllocError) {
    if !matches!(err, AllocError::ZeroSize { .. }) {
        log::warn!("heap request failed: {}", Report::new(err));
    }
}

/// Block size needed for a payload of `size` bytes: one header word on top,
/// rounded up to the alignment and never below the minimum block size.
fn block_size_for(size: usize) -> Option<usize> {
    let size = size
        .checked_add(WORD_SIZE)?
        .checked_next_multiple_of(ALIGNMENT)?;
    Some(cmp::max(size, MIN_BLOCK_SIZE))
}

/// Returns the heap core, creating it first if needed.
fn initialized<'a, G>(
    growth: &mut G,
    slot: &'a mut Option<Core>,
    config: &HeapConfig,
    events: &mut Events,
) -> Result<&'a mut Core, AllocError>
where
    G: ArenaGrowth,
{
    if let Some(core) = slot.take() {
        return Ok(slot.insert(core));
    }

    let core = slot.insert(Core::with_sentinels(growth)?);
    events.push(Event::Initialized {
        base: core.arena.base().as_ptr().addr(),
    });
    core.extend(growth, config.chunk_size(), events)?;
    Ok(core)
}

impl Core {
    /// Obtains the prologue and epilogue words, with no blocks in between.
    fn with_sentinels<G>(growth: &mut G) -> Result<Self, AllocError>
    where
        G: ArenaGrowth + ?Sized,
    {
        const SENTINELS_SIZE: usize = 2 * WORD_SIZE;

        let base = growth
            .extend(SENTINELS_SIZE)
            .context(GrowSnafu {
                bytes: SENTINELS_SIZE,
            })?;
        let addr = base.as_ptr().addr();
        ensure!(addr.is_multiple_of(ALIGNMENT), MisalignedArenaSnafu { addr });

        let mut arena = unsafe { Arena::new(base, SENTINELS_SIZE) };
        arena.write(PROLOGUE, BoundaryTag::SENTINEL.to_word());
        arena.write(
            Block::FIRST.offset(),
            BoundaryTag::SENTINEL.with_prev_allocated(true).to_word(),
        );

        Ok(Self {
            arena,
            free_list: FreeList::new(),
        })
    }

    /// Grows the arena by at least `size` bytes and returns the free block
    /// covering the new space, merged with a free block that ended the arena
    /// before.
    ///
    /// On failure nothing is changed.
    fn extend<G>(
        &mut self,
        growth: &mut G,
        size: usize,
        events: &mut Events,
    ) -> Result<Block, AllocError>
    where
        G: ArenaGrowth + ?Sized,
    {
        let size = size
            .checked_next_multiple_of(ALIGNMENT)
            .context(SizeOverflowSnafu { size })?;
        let old_len = self.arena.grow(growth, size)?;

        // The old epilogue header becomes the header of the new block.
        let block = Block::from_offset(old_len - WORD_SIZE);
        let prev_allocated = block.is_prev_allocated(&self.arena);
        block.write_header(&mut self.arena, size, false, prev_allocated);
        block.write_footer(&mut self.arena, size, false);

        let epilogue = block.next(&self.arena);
        self.arena
            .write(epilogue.offset(), BoundaryTag::SENTINEL.to_word());

        events.push(Event::Extended {
            bytes: size,
            arena_len: self.arena.len(),
        });
        Ok(coalesce(&mut self.arena, &mut self.free_list, block))
    }

    /// Marks the free `block` as allocated with `size` bytes, splitting off
    /// the tail as a new free block when it is large enough to stand alone.
    fn place(&mut self, block: Block, size: usize) {
        let arena = &mut self.arena;
        let block_size = block.size(arena);
        let prev_allocated = block.is_prev_allocated(arena);
        debug_assert!(block_size >= size);

        self.free_list.remove(arena, block);

        let rest_size = block_size - size;
        if rest_size >= MIN_BLOCK_SIZE {
            block.write_header(arena, size, true, prev_allocated);
            let rest = block.next(arena);
            rest.write_header(arena, rest_size, false, true);
            rest.write_footer(arena, rest_size, false);
            coalesce(arena, &mut self.free_list, rest);
        } else {
            block.write_header(arena, block_size, true, prev_allocated);
            block.next(arena).set_prev_allocated(arena, true);
        }
    }

    /// Marks the allocated `block` as free and merges it with its neighbours.
    fn free(&mut self, block: Block) {
        let arena = &mut self.arena;
        let size = block.size(arena);
        let prev_allocated = block.is_prev_allocated(arena);
        block.write_header(arena, size, false, prev_allocated);
        block.write_footer(arena, size, false);
        coalesce(arena, &mut self.free_list, block);
    }

    /// Maps a payload pointer to its block if it looks like a live allocation.
    fn owned_block(&self, ptr: NonNull<u8>) -> Option<Block> {
        let payload = self.arena.offset_of(ptr)?;
        if payload < Block::FIRST.payload() || !payload.is_multiple_of(ALIGNMENT) {
            return None;
        }
        let block = Block::from_payload(payload);
        let header = block.header(&self.arena);
        (header.is_allocated() && !header.is_sentinel()).then_some(block)
    }
}
