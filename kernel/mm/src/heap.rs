//! The `Heap` capability trait and the two concrete backed heaps built on
//! top of an id heap plus a page-table mapper: a page-backed heap (each
//! allocation maps fresh physical pages) and a linear-backed heap (the
//! whole id-heap range is mapped once up front, allocation is pure
//! bookkeeping against that already-mapped window).
//!
//! Each concrete heap embeds a reference to its parent heap rather than
//! inheriting from it — composition over inheritance, since Rust has no
//! struct inheritance to reach for here.

use crate::idheap::IdHeap;
use crate::mmu::PageTableMapper;
use crate::pageflags::PageFlags;
use vesper_core::sync::SpinLock;
use vesper_core::VirtAddr;

/// A source of virtual memory. Implemented by every heap in the backed-heap
/// hierarchy so a heap can sit transparently in front of another: a locked
/// wrapper heap in front of an mcache, an mcache in front of a page-backed
/// heap, and so on.
pub trait Heap {
    /// Allocates `size` bytes, returning the start address, or `None` if the
    /// heap (and its parent, if any) cannot satisfy the request.
    fn alloc(&self, size: u64) -> Option<VirtAddr>;

    /// Returns a previous allocation of `size` bytes starting at `addr`.
    fn dealloc(&self, addr: VirtAddr, size: u64);

    /// The granularity this heap maps at.
    fn pagesize(&self) -> u64;

    /// Whether this heap may be called concurrently from multiple CPUs
    /// without an external lock.
    fn thread_safe(&self) -> bool;
}

/// A heap that maps a fresh run of physical pages for every allocation and
/// unmaps them on free. Good for large, infrequent allocations (kernel
/// stacks, DMA buffers) where per-allocation mapping cost is negligible.
pub struct PageBackedHeap<'a, M: PageTableMapper> {
    ids: SpinLock<IdHeap>,
    physical: &'a SpinLock<IdHeap>,
    mapper: &'a M,
    pagesize: u64,
    flags: PageFlags,
}

impl<'a, M: PageTableMapper> PageBackedHeap<'a, M> {
    /// Creates a heap managing `[base, base+size)`, mapped at `pagesize`
    /// granularity with `flags` through `mapper`. Physical frames backing
    /// each allocation (and any intermediate page-table frames the mapper
    /// needs along the way) come from `physical`.
    pub fn new(
        base: VirtAddr,
        size: u64,
        pagesize: u64,
        flags: PageFlags,
        mapper: &'a M,
        physical: &'a SpinLock<IdHeap>,
    ) -> Self {
        Self {
            ids: SpinLock::new(IdHeap::new(base.as_u64(), size)),
            physical,
            mapper,
            pagesize,
            flags,
        }
    }

    /// Allocates one 4 KiB frame from the physical heap for an intermediate
    /// page-table level. Never fails silently: a starved physical heap
    /// during boot is a fatal configuration error the caller halts on, not
    /// something this closure can recover from, so it returns the zero
    /// address on exhaustion and lets the mapper's own invariants catch it.
    fn alloc_table_frame(&self) -> vesper_core::PhysAddr {
        self.physical
            .lock()
            .alloc(0x1000, 0x1000)
            .map(vesper_core::PhysAddr::new)
            .unwrap_or(vesper_core::PhysAddr::zero())
    }
}

impl<M: PageTableMapper> Heap for PageBackedHeap<'_, M> {
    fn alloc(&self, size: u64) -> Option<VirtAddr> {
        let pages = size.div_ceil(self.pagesize);
        let start = self.ids.lock().alloc(pages * self.pagesize, self.pagesize).ok()?;
        let start = VirtAddr::new(start);
        for i in 0..pages {
            let virt = start + i * self.pagesize;
            let phys = self.physical.lock().alloc(self.pagesize, self.pagesize)?;
            // SAFETY: the id heap guarantees this range is not already mapped,
            // and the physical range was just claimed from the physical heap.
            unsafe {
                self.mapper.map(virt, vesper_core::PhysAddr::new(phys), self.flags, self.pagesize, &mut || {
                    self.alloc_table_frame()
                });
            }
        }
        Some(start)
    }

    fn dealloc(&self, addr: VirtAddr, size: u64) {
        let pages = size.div_ceil(self.pagesize);
        for i in 0..pages {
            let virt = addr + i * self.pagesize;
            // SAFETY: caller guarantees `addr..addr+size` is a prior live allocation.
            let freed = unsafe { self.mapper.unmap(virt, self.pagesize) };
            if let Some(phys) = freed {
                let _ = self.physical.lock().dealloc(phys.as_u64(), self.pagesize);
            }
        }
        let _ = self.ids.lock().dealloc(addr.as_u64(), pages * self.pagesize);
    }

    fn pagesize(&self) -> u64 {
        self.pagesize
    }

    fn thread_safe(&self) -> bool {
        true
    }
}

/// A heap whose entire backing range is mapped once, up front; allocation
/// is then pure id-heap bookkeeping with no further page-table calls. Good
/// for ranges that will end up densely used (the kernel heap itself).
pub struct LinearBackedHeap {
    ids: SpinLock<IdHeap>,
    pagesize: u64,
}

impl LinearBackedHeap {
    /// Creates a heap over `[base, base+size)`, which the caller has already
    /// mapped in full.
    pub fn new(base: VirtAddr, size: u64, pagesize: u64) -> Self {
        Self {
            ids: SpinLock::new(IdHeap::new(base.as_u64(), size)),
            pagesize,
        }
    }
}

impl Heap for LinearBackedHeap {
    fn alloc(&self, size: u64) -> Option<VirtAddr> {
        self.ids.lock().alloc(size, self.pagesize).ok().map(VirtAddr::new)
    }

    fn dealloc(&self, addr: VirtAddr, size: u64) {
        let _ = self.ids.lock().dealloc(addr.as_u64(), size);
    }

    fn pagesize(&self) -> u64 {
        self.pagesize
    }

    fn thread_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::PageTableMapper;
    use core::cell::RefCell;
    use vesper_core::PhysAddr;

    struct NullMapper {
        mapped: RefCell<u32>,
    }

    impl PageTableMapper for NullMapper {
        unsafe fn map(
            &self,
            _virt: VirtAddr,
            _phys: PhysAddr,
            _flags: PageFlags,
            _pagesize: u64,
            _alloc_frame: &mut dyn FnMut() -> PhysAddr,
        ) {
            *self.mapped.borrow_mut() += 1;
        }

        unsafe fn unmap(&self, _virt: VirtAddr, _pagesize: u64) -> Option<PhysAddr> {
            *self.mapped.borrow_mut() -= 1;
            Some(PhysAddr::zero())
        }

        fn translate(&self, _virt: VirtAddr) -> Option<PhysAddr> {
            None
        }
    }

    #[test]
    fn page_backed_heap_maps_one_page_per_allocated_page() {
        let mapper = NullMapper { mapped: RefCell::new(0) };
        let physical = SpinLock::new(IdHeap::new(0, 0x100_0000));
        let heap = PageBackedHeap::new(
            VirtAddr::new(0x1000_0000),
            0x10_0000,
            0x1000,
            PageFlags::memory(),
            &mapper,
            &physical,
        );
        let addr = heap.alloc(0x3000).unwrap();
        assert_eq!(*mapper.mapped.borrow(), 3);
        heap.dealloc(addr, 0x3000);
        assert_eq!(*mapper.mapped.borrow(), 0);
    }

    #[test]
    fn page_backed_heap_draws_physical_frames_from_physical_heap() {
        let mapper = NullMapper { mapped: RefCell::new(0) };
        let physical = SpinLock::new(IdHeap::new(0, 0x3000));
        let heap = PageBackedHeap::new(
            VirtAddr::new(0x2000_0000),
            0x10_0000,
            0x1000,
            PageFlags::memory(),
            &mapper,
            &physical,
        );
        // Exactly three pages of physical backing exist; a fourth allocation
        // must fail rather than silently mapping unbacked memory.
        assert!(heap.alloc(0x3000).is_some());
        assert!(heap.alloc(0x1000).is_none());
    }

    #[test]
    fn linear_backed_heap_needs_no_mapper() {
        let heap = LinearBackedHeap::new(VirtAddr::new(0x2000_0000), 0x10_0000, 0x1000);
        let a = heap.alloc(0x1000).unwrap();
        let b = heap.alloc(0x1000).unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.pagesize(), 0x1000);
    }
}
