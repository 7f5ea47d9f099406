use core::ptr::NonNull;
use std::alloc::{self, Layout};

use brk_arena::BrkArena;

use crate::{Heap, HeapConfig};

/// Runs `test_fn` over `size` bytes of 16-byte aligned scratch memory.
pub(crate) fn with_test_memory<F>(size: usize, test_fn: F)
where
    F: FnOnce(NonNull<u8>, usize),
{
    unsafe {
        let layout = Layout::from_size_align(size, 16).unwrap();
        let start = NonNull::new(alloc::alloc(layout)).unwrap();
        test_fn(start, size);
        alloc::dealloc(start.as_ptr(), layout);
    }
}

pub(crate) fn with_test_heap<F>(capacity: usize, test_fn: F)
where
    F: FnOnce(&mut Heap<BrkArena>),
{
    with_test_heap_config(capacity, HeapConfig::new(), test_fn);
}

/// Runs `test_fn` with a fresh heap whose growth source can hand out at most
/// `capacity` bytes.
pub(crate) fn with_test_heap_config<F>(capacity: usize, config: HeapConfig, test_fn: F)
where
    F: FnOnce(&mut Heap<BrkArena>),
{
    with_test_memory(capacity, |start, size| {
        let arena = unsafe { BrkArena::new(start, size) };
        let mut heap = Heap::with_config(arena, config);
        test_fn(&mut heap);
    });
}
