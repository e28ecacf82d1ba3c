//! Page-table mapping contract and batched TLB invalidation.
//!
//! The actual page-table walk is architecture-specific and lives outside
//! this crate; `vesper-mm` only defines the [`PageTableMapper`] contract
//! those arch implementations satisfy, plus the [`TlbShootdownSet`]
//! accumulator that batches invalidations across a run-loop pass instead of
//! flushing on every single unmap.

use crate::pageflags::PageFlags;
use planck_noalloc::vec::ArrayVec;
use vesper_core::{PhysAddr, VirtAddr};

/// Upper bound on distinct pages a single run-loop pass can accumulate
/// before the shootdown set degrades to a full flush.
pub const MAX_BATCHED_PAGES: usize = 64;

/// Operations a concrete page-table implementation must provide.
///
/// Implemented per architecture outside this crate (the x86_64 4/5-level
/// page table walker, the aarch64 equivalent); kept as a trait here so the
/// id-heap-driven mapping logic above it stays host-testable.
pub trait PageTableMapper {
    /// Maps `virt` to `phys` with the given permissions, at `pagesize`
    /// granularity. Allocates intermediate page-table frames from `alloc_frame`
    /// as needed.
    ///
    /// # Safety
    /// `virt` must not already be mapped, and `phys` must be a frame this
    /// address space is allowed to own for its lifetime.
    unsafe fn map(
        &self,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
        pagesize: u64,
        alloc_frame: &mut dyn FnMut() -> PhysAddr,
    );

    /// Unmaps `virt`, returning the physical frame it was backed by, if any.
    ///
    /// # Safety
    /// No live reference may exist into the mapped range after this call.
    unsafe fn unmap(&self, virt: VirtAddr, pagesize: u64) -> Option<PhysAddr>;

    /// Looks up the physical frame `virt` currently maps to, if mapped.
    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr>;
}

/// Accumulates virtual addresses unmapped or re-permissioned during a
/// run-loop pass, flushed once in a single batch at the pass's next entry
/// rather than with one shootdown IPI per unmap.
#[derive(Default)]
pub struct TlbShootdownSet {
    pages: ArrayVec<VirtAddr, MAX_BATCHED_PAGES>,
    full_flush: bool,
}

impl TlbShootdownSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        Self {
            pages: ArrayVec::new(),
            full_flush: false,
        }
    }

    /// Records `virt` as needing invalidation. Once more than
    /// [`MAX_BATCHED_PAGES`] distinct pages are queued, the set degrades to
    /// requesting a full TLB flush instead of tracking individually.
    pub fn record(&mut self, virt: VirtAddr) {
        if self.full_flush {
            return;
        }
        if self.pages.try_push(virt).is_err() {
            self.full_flush = true;
        }
    }

    /// Drains the set, calling `invalidate_page` for each batched address,
    /// or `invalidate_all` once if the set degraded to a full flush.
    pub fn flush(&mut self, mut invalidate_page: impl FnMut(VirtAddr), invalidate_all: impl FnOnce()) {
        if self.full_flush {
            invalidate_all();
        } else {
            for page in self.pages.iter() {
                invalidate_page(*page);
            }
        }
        self.pages.clear();
        self.full_flush = false;
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        !self.full_flush && self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_calls_per_page_invalidate_below_threshold() {
        let mut set = TlbShootdownSet::new();
        set.record(VirtAddr::new(0x1000));
        set.record(VirtAddr::new(0x2000));
        let mut seen = 0;
        set.flush(|_| seen += 1, || panic!("should not full-flush"));
        assert_eq!(seen, 2);
        assert!(set.is_empty());
    }

    #[test]
    fn degrades_to_full_flush_past_capacity() {
        let mut set = TlbShootdownSet::new();
        for i in 0..MAX_BATCHED_PAGES + 1 {
            set.record(VirtAddr::new((i as u64) * 0x1000));
        }
        let mut full = false;
        set.flush(|_| panic!("should full-flush instead"), || full = true);
        assert!(full);
    }
}
