//! [`GlobalAlloc`] adapter.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use brk_arena::ArenaGrowth;
use spin::{Mutex, MutexGuard};

use crate::{AllocError, Heap, events::Events, heap::log_failure, tag::ALIGNMENT};

/// A [`Heap`] behind a spin lock, usable as `#[global_allocator]`.
///
/// Requests aligned to more than 16 bytes are refused with a null pointer.
///
/// ```
/// use core::{alloc::{GlobalAlloc, Layout}, ptr::NonNull};
///
/// use tagalloc::{BrkArena, Heap, LockedHeap};
///
/// let mut memory = vec![0u128; 1024];
/// let start = NonNull::new(memory.as_mut_ptr()).unwrap().cast::<u8>();
/// let heap = LockedHeap::new(Heap::new(unsafe { BrkArena::new(start, 16 * 1024) }));
///
/// let layout = Layout::from_size_align(100, 8).unwrap();
/// let ptr = unsafe { heap.alloc(layout) };
/// assert!(!ptr.is_null());
/// unsafe { heap.dealloc(ptr, layout) };
/// assert!(heap.lock().check_integrity());
/// ```
pub struct LockedHeap<G> {
    heap: Mutex<Heap<G>>,
}

impl<G> LockedHeap<G> {
    #[must_use]
    pub const fn new(heap: Heap<G>) -> Self {
        Self {
            heap: Mutex::new(heap),
        }
    }

    /// Locks the heap for direct access.
    ///
    /// The heap's own operations log only after they are done with the heap,
    /// but a caller that logs while holding the guard (including through
    /// [`Heap::check_integrity`]) must not have a logger that allocates from
    /// this heap.
    pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
        self.heap.lock()
    }

    /// Runs `request` under the lock, then logs what it recorded and any
    /// failure once the lock is released.
    fn with_heap<T>(
        &self,
        request: impl FnOnce(&mut Heap<G>, &mut Events) -> Result<T, AllocError>,
    ) -> Option<T> {
        let mut events = Events::new();
        let result = request(&mut *self.lock(), &mut events);
        events.emit();
        result.inspect_err(log_failure).ok()
    }
}

unsafe impl<G> GlobalAlloc for LockedHeap<G>
where
    G: ArenaGrowth + Send,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.with_heap(|heap, events| heap.allocate_deferred(layout.size(), events))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with_heap(|heap, _| unsafe { heap.try_deallocate(ptr) });
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.with_heap(|heap, events| heap.allocate_zeroed_deferred(1, layout.size(), events))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.with_heap(|heap, events| unsafe { heap.reallocate_deferred(ptr, new_size, events) })
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::{
        alloc::{self, Layout},
        cell::Cell,
        sync::{
            OnceLock,
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use brk_arena::BrkArena;

    use super::*;
    use crate::{HeapConfig, WORD_SIZE};

    fn with_locked_heap<F>(capacity: usize, test_fn: F)
    where
        F: FnOnce(&LockedHeap<BrkArena>),
    {
        unsafe {
            let layout = Layout::from_size_align(capacity, 16).unwrap();
            let start = NonNull::new(alloc::alloc(layout)).unwrap();
            let heap = LockedHeap::new(Heap::new(BrkArena::new(start, capacity)));
            test_fn(&heap);
            alloc::dealloc(start.as_ptr(), layout);
        }
    }

    #[test]
    fn test_alloc_and_dealloc() {
        with_locked_heap(4096, |heap| {
            let layout = Layout::from_size_align(64, 16).unwrap();
            let ptr = unsafe { heap.alloc(layout) };
            assert!(!ptr.is_null());
            assert!(ptr.addr().is_multiple_of(16));
            unsafe {
                ptr.write_bytes(0x33, 64);
                heap.dealloc(ptr, layout);
            }
            assert_eq!(heap.lock().verify().unwrap().free_blocks, 1);
        });
    }

    #[test]
    fn test_refuses_large_alignment() {
        with_locked_heap(4096, |heap| {
            let layout = Layout::from_size_align(64, 32).unwrap();
            assert!(unsafe { heap.alloc(layout) }.is_null());
            assert!(unsafe { heap.alloc_zeroed(layout) }.is_null());
            assert!(!heap.lock().is_initialized());
        });
    }

    #[test]
    fn test_alloc_zeroed() {
        with_locked_heap(4096, |heap| {
            let layout = Layout::from_size_align(128, 8).unwrap();
            let dirty = unsafe { heap.alloc(layout) };
            unsafe {
                dirty.write_bytes(0xee, 128);
                heap.dealloc(dirty, layout);
            }
            let ptr = unsafe { heap.alloc_zeroed(layout) };
            assert_eq!(ptr, dirty);
            let bytes = unsafe { core::slice::from_raw_parts(ptr, 128) };
            assert!(bytes.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn test_realloc() {
        with_locked_heap(8192, |heap| {
            let layout = Layout::from_size_align(16, 8).unwrap();
            let ptr = unsafe { heap.alloc(layout) };
            unsafe {
                for i in 0..16 {
                    ptr.add(i).write(i as u8);
                }
            }
            let ptr = unsafe { heap.realloc(ptr, layout, 2000) };
            assert!(!ptr.is_null());
            let bytes = unsafe { core::slice::from_raw_parts(ptr, 16) };
            assert!(bytes.iter().enumerate().all(|(i, &b)| b == i as u8));
            unsafe {
                heap.dealloc(ptr, Layout::from_size_align(2000, 8).unwrap());
            }
            assert!(heap.lock().check_integrity());
        });
    }

    #[test]
    fn test_shared_between_threads() {
        with_locked_heap(1 << 20, |heap| {
            thread::scope(|s| {
                for t in 0..4_u8 {
                    s.spawn(move || {
                        let layout = Layout::from_size_align(48, 16).unwrap();
                        for _ in 0..200 {
                            let ptr = unsafe { heap.alloc(layout) };
                            assert!(!ptr.is_null());
                            unsafe {
                                ptr.write_bytes(t, 48);
                                let bytes = core::slice::from_raw_parts(ptr, 48);
                                assert!(bytes.iter().all(|&b| b == t));
                                heap.dealloc(ptr, layout);
                            }
                        }
                    });
                }
            });
            let summary = heap.lock().verify().unwrap();
            assert_eq!(summary.free_blocks, 1);
            assert_eq!(summary.allocated_bytes, 0);
        });
    }

    static LOG_HEAP: OnceLock<&'static LockedHeap<BrkArena>> = OnceLock::new();
    static LOG_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

    thread_local! {
        static IN_LOG: Cell<bool> = const { Cell::new(false) };
    }

    /// A logger that allocates every record from [`LOG_HEAP`].
    struct AllocatingLogger;

    impl log::Log for AllocatingLogger {
        fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, _record: &log::Record<'_>) {
            let Some(heap) = LOG_HEAP.get() else {
                return;
            };
            if IN_LOG.replace(true) {
                return;
            }
            let layout = Layout::from_size_align(64, 16).unwrap();
            let ptr = unsafe { heap.alloc(layout) };
            if !ptr.is_null() {
                LOG_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
                unsafe { heap.dealloc(ptr, layout) };
            }
            IN_LOG.set(false);
        }

        fn flush(&self) {}
    }

    static LOGGER: AllocatingLogger = AllocatingLogger;

    #[test]
    fn test_logger_may_allocate_from_the_same_heap() {
        let memory = Box::leak(vec![0u128; 512].into_boxed_slice());
        let start = NonNull::new(memory.as_mut_ptr()).unwrap().cast::<u8>();
        let heap: &'static LockedHeap<BrkArena> = Box::leak(Box::new(LockedHeap::new(
            Heap::new(unsafe { BrkArena::new(start, 8 * 1024) }),
        )));
        let Ok(()) = LOG_HEAP.set(heap) else {
            panic!("log heap already set");
        };
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Trace);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut outside = 0u64;
            let huge = Layout::from_size_align(100_000, 16).unwrap();
            let refused = unsafe { heap.alloc(huge) }.is_null();
            unsafe {
                heap.dealloc(
                    ptr::from_mut(&mut outside).cast(),
                    Layout::new::<u64>(),
                );
            }
            tx.send(refused).unwrap();
        });

        // Init, the first chunk, the failed growth and the rejected free are
        // all logged once the lock is released.
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(LOG_ALLOCATIONS.load(Ordering::Relaxed) >= 4);
        let summary = heap.lock().verify().unwrap();
        assert_eq!(summary.arena_len, 2 * WORD_SIZE + HeapConfig::DEFAULT_CHUNK_SIZE);
    }
}
