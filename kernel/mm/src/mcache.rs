//! A size-class caching allocator sitting in front of a [`Heap`].
//!
//! Small, frequent allocations (scheduler queue nodes, timer entries) round
//! up to the nearest power-of-two size class and are served from a per-class
//! free list instead of going through the parent heap's full alloc path on
//! every call.

use crate::heap::Heap;
use planck_noalloc::vec::ArrayVec;
use vesper_core::sync::SpinLock;
use vesper_core::VirtAddr;

/// Number of size classes tracked, covering 16 bytes through 16 KiB.
pub const SIZE_CLASSES: usize = 11;
/// Smallest size class, in bytes.
pub const MIN_CLASS_SIZE: u64 = 16;
/// Upper bound on cached free blocks kept per size class before they are
/// returned to the parent heap instead of retained.
pub const MAX_CACHED_PER_CLASS: usize = 64;

fn class_for(size: u64) -> Option<usize> {
    let size = size.max(MIN_CLASS_SIZE);
    let class_size = size.next_power_of_two();
    let class = (class_size.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize;
    (class < SIZE_CLASSES).then_some(class)
}

const fn size_for_class(class: usize) -> u64 {
    MIN_CLASS_SIZE << class
}

/// A size-class allocator caching free blocks in front of a parent [`Heap`].
pub struct Mcache<'a, H: Heap> {
    parent: &'a H,
    free_lists: SpinLock<[ArrayVec<VirtAddr, MAX_CACHED_PER_CLASS>; SIZE_CLASSES]>,
}

impl<'a, H: Heap> Mcache<'a, H> {
    /// Creates an mcache drawing from `parent` when a size class's free list
    /// is empty.
    pub fn new(parent: &'a H) -> Self {
        Self {
            parent,
            free_lists: SpinLock::new(core::array::from_fn(|_| ArrayVec::new())),
        }
    }
}

impl<H: Heap> Heap for Mcache<'_, H> {
    fn alloc(&self, size: u64) -> Option<VirtAddr> {
        let class = class_for(size)?;
        if let Some(addr) = self.free_lists.lock()[class].pop() {
            return Some(addr);
        }
        self.parent.alloc(size_for_class(class))
    }

    fn dealloc(&self, addr: VirtAddr, size: u64) {
        let Some(class) = class_for(size) else {
            self.parent.dealloc(addr, size);
            return;
        };
        let mut lists = self.free_lists.lock();
        if lists[class].try_push(addr).is_err() {
            drop(lists);
            self.parent.dealloc(addr, size_for_class(class));
        }
    }

    fn pagesize(&self) -> u64 {
        self.parent.pagesize()
    }

    fn thread_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct CountingHeap {
        calls: RefCell<u32>,
        next: RefCell<u64>,
    }

    impl Heap for CountingHeap {
        fn alloc(&self, size: u64) -> Option<VirtAddr> {
            *self.calls.borrow_mut() += 1;
            let mut next = self.next.borrow_mut();
            let addr = *next;
            *next += size;
            Some(VirtAddr::new(addr))
        }
        fn dealloc(&self, _addr: VirtAddr, _size: u64) {}
        fn pagesize(&self) -> u64 {
            0x1000
        }
        fn thread_safe(&self) -> bool {
            true
        }
    }

    #[test]
    fn class_rounds_up_to_power_of_two() {
        assert_eq!(class_for(17), class_for(32));
        assert_eq!(size_for_class(class_for(17).unwrap()), 32);
    }

    #[test]
    fn dealloc_then_alloc_reuses_without_hitting_parent() {
        let parent = CountingHeap { calls: RefCell::new(0), next: RefCell::new(0) };
        let cache = Mcache::new(&parent);
        let a = cache.alloc(32).unwrap();
        assert_eq!(*parent.calls.borrow(), 1);
        cache.dealloc(a, 32);
        let b = cache.alloc(32).unwrap();
        assert_eq!(*parent.calls.borrow(), 1);
        assert_eq!(a, b);
    }
}
