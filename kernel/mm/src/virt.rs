//! Virtual id heaps: two [`IdHeap`]s per address-space region, one handing
//! out ranges at huge-page (2 MiB) granularity and one at regular 4 KiB
//! granularity, both drawing from the same backing virtual address window.

use crate::idheap::{IdHeap, IdHeapError};
use vesper_core::VirtAddr;

/// Granularity of the huge-page virtual id heap.
pub const HUGE_PAGE_SIZE: u64 = 0x20_0000;
/// Granularity of the small-page virtual id heap.
pub const SMALL_PAGE_SIZE: u64 = 0x1000;

/// A pair of virtual id heaps sharing one address window: a huge-page heap
/// for bulk mappings and a 4 KiB heap for everything else.
///
/// The two heaps never overlap: the huge heap is seeded with the low part
/// of the window (rounded down to a huge-page boundary) and the small heap
/// with the remainder, so a single virtual address can never be live in
/// both.
pub struct VirtualHeaps {
    huge: IdHeap,
    small: IdHeap,
}

impl VirtualHeaps {
    /// Splits `[base, base+size)` into a huge-page region and a 4 KiB
    /// region, in a `huge_fraction` (0..=100) / remainder split, both ends
    /// rounded to keep each heap aligned to its own granularity.
    pub fn new(base: VirtAddr, size: u64, huge_fraction_pct: u64) -> Self {
        let huge_size = ((size * huge_fraction_pct.min(100)) / 100) & !(HUGE_PAGE_SIZE - 1);
        let huge = IdHeap::new(base.as_u64(), huge_size);
        let small_base = base.as_u64() + huge_size;
        let small_size = (size - huge_size) & !(SMALL_PAGE_SIZE - 1);
        let small = IdHeap::new(small_base, small_size);
        Self { huge, small }
    }

    /// Allocates `count` huge pages worth of virtual address space.
    pub fn alloc_huge(&mut self, count: u64) -> Result<VirtAddr, IdHeapError> {
        self.huge
            .alloc(count * HUGE_PAGE_SIZE, HUGE_PAGE_SIZE)
            .map(VirtAddr::new)
    }

    /// Returns `count` huge pages worth of virtual address space.
    pub fn dealloc_huge(&mut self, addr: VirtAddr, count: u64) -> Result<(), IdHeapError> {
        self.huge.dealloc(addr.as_u64(), count * HUGE_PAGE_SIZE)
    }

    /// Allocates `count` 4 KiB pages worth of virtual address space.
    pub fn alloc_small(&mut self, count: u64) -> Result<VirtAddr, IdHeapError> {
        self.small
            .alloc(count * SMALL_PAGE_SIZE, SMALL_PAGE_SIZE)
            .map(VirtAddr::new)
    }

    /// Returns `count` 4 KiB pages worth of virtual address space.
    pub fn dealloc_small(&mut self, addr: VirtAddr, count: u64) -> Result<(), IdHeapError> {
        self.small.dealloc(addr.as_u64(), count * SMALL_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_and_small_ranges_never_overlap() {
        let mut v = VirtualHeaps::new(VirtAddr::new(0x1000_0000_0000), 0x1000_0000, 50);
        let huge = v.alloc_huge(1).unwrap();
        let small = v.alloc_small(1).unwrap();
        assert!(huge.as_u64() < small.as_u64());
        assert_eq!(huge.as_u64() % HUGE_PAGE_SIZE, 0);
        assert_eq!(small.as_u64() % SMALL_PAGE_SIZE, 0);
    }

    #[test]
    fn huge_allocation_granularity_is_exact() {
        let mut v = VirtualHeaps::new(VirtAddr::new(0), 0x10_0000_0000, 50);
        let a = v.alloc_huge(2).unwrap();
        let b = v.alloc_huge(1).unwrap();
        assert_eq!(b.as_u64() - a.as_u64(), 2 * HUGE_PAGE_SIZE);
    }
}
