//! A monotone builder for page table entry permission flags.
//!
//! The builder only ever narrows permissions: starting from
//! `PageFlags::memory()` (present, read-write) and calling `.readonly()`
//! after `.writable()` leaves the mapping read-only, matching how callers
//! incrementally tighten permissions (map writable for initialization, then
//! mark read-only) rather than widen them.

use bitflags::bitflags;

bitflags! {
    /// Raw page table entry flag bits, architecture-neutral subset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RawPageFlags: u64 {
        /// The entry is valid and may be walked.
        const PRESENT = 1 << 0;
        /// The mapped page may be written.
        const WRITABLE = 1 << 1;
        /// The mapping is accessible from user mode.
        const USER = 1 << 2;
        /// The mapped page may not be executed.
        const NO_EXECUTE = 1 << 63;
        /// The entry maps a huge page rather than pointing at the next level.
        const HUGE_PAGE = 1 << 7;
        /// The mapping is shared across all address spaces (not flushed
        /// from the TLB on a context switch).
        const GLOBAL = 1 << 8;
    }
}

/// A builder for [`RawPageFlags`] that only narrows permissions once set.
#[derive(Debug, Clone, Copy)]
pub struct PageFlags(RawPageFlags);

impl PageFlags {
    /// A present, read-write, non-executable, supervisor-only mapping — the
    /// starting point every other combination is built from.
    pub const fn memory() -> Self {
        Self(RawPageFlags::from_bits_truncate(
            RawPageFlags::PRESENT.bits() | RawPageFlags::NO_EXECUTE.bits(),
        ))
    }

    /// Marks the mapping writable.
    pub const fn writable(self) -> Self {
        Self(self.0.union(RawPageFlags::WRITABLE))
    }

    /// Marks the mapping read-only, clearing a previously-set writable bit.
    pub const fn readonly(self) -> Self {
        Self(self.0.difference(RawPageFlags::WRITABLE))
    }

    /// Marks the mapping executable, clearing the no-execute bit.
    pub const fn executable(self) -> Self {
        Self(self.0.difference(RawPageFlags::NO_EXECUTE))
    }

    /// Marks the mapping accessible from user mode.
    pub const fn user(self) -> Self {
        Self(self.0.union(RawPageFlags::USER))
    }

    /// Marks the mapping as a huge page leaf.
    pub const fn huge(self) -> Self {
        Self(self.0.union(RawPageFlags::HUGE_PAGE))
    }

    /// Marks the mapping global (not flushed on a CR3 switch).
    pub const fn global(self) -> Self {
        Self(self.0.union(RawPageFlags::GLOBAL))
    }

    /// Returns the raw flag bits for programming into a page table entry.
    pub const fn bits(self) -> u64 {
        self.0.bits()
    }

    /// Returns `true` if the writable bit is set.
    pub const fn is_writable(self) -> bool {
        self.0.contains(RawPageFlags::WRITABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_then_readonly_ends_readonly() {
        let flags = PageFlags::memory().writable().readonly();
        assert!(!flags.is_writable());
    }

    #[test]
    fn readonly_then_writable_ends_writable() {
        let flags = PageFlags::memory().readonly().writable();
        assert!(flags.is_writable());
    }

    #[test]
    fn executable_clears_no_execute() {
        let flags = PageFlags::memory().executable();
        assert!(!flags.0.contains(RawPageFlags::NO_EXECUTE));
    }

    #[test]
    fn memory_default_is_present_and_not_writable() {
        let flags = PageFlags::memory();
        assert!(flags.0.contains(RawPageFlags::PRESENT));
        assert!(!flags.is_writable());
    }
}
