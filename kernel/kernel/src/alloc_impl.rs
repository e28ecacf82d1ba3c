//! The `#[global_allocator]` bridge from `alloc::alloc::GlobalAlloc` to the
//! kernel heaps aggregate's locked mcache.
//!
//! Anything in the crate (and its dependents) that uses `alloc::boxed::Box`,
//! `alloc::vec::Vec`, or similar goes through here. Before
//! [`crate::heaps::init_kernel_heaps`] has run there is nothing backing this
//! allocator at all, so any such use before that point is a boot-sequencing
//! bug, not a recoverable condition — it halts rather than returning a null
//! pointer the caller won't check.

use core::alloc::{GlobalAlloc, Layout};

use vesper_mm::heap::Heap;

use crate::context;

struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(layout.align()) as u64;
        match context::heaps().locked.alloc(size) {
            Some(addr) => addr.as_mut_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size().max(layout.align()) as u64;
        let addr = vesper_core::VirtAddr::new(ptr as u64);
        context::heaps().locked.dealloc(addr, size);
    }
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// Called by `alloc`'s default `handle_alloc_error` hook when an allocation
/// fails outright (distinct from a `Heap::alloc` returning `None`, which
/// callers that can survive exhaustion are expected to check for instead).
#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    crate::kerror!("alloc: out of memory, layout={:?}", layout);
    loop {
        crate::arch::disable_interrupts();
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}
