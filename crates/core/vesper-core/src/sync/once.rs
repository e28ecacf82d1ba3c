//! A cell set at most once, by an explicit call rather than a closure run on
//! first access. Where [`super::LazyLock`] fits a value computable anywhere
//! with no inputs, `OnceCell` fits boot-sequenced state: the kernel heaps,
//! the per-CPU array, anything that needs arguments only the boot path has
//! (a region table, an HHDM offset) before it can be built.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// A value set exactly once, read afterward from any CPU.
pub struct OnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Sync + Send> Sync for OnceCell<T> {}

impl<T> Default for OnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceCell<T> {
    /// Creates an empty cell.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Sets the cell's value. Returns `value` back as `Err` if the cell was
    /// already set — set-once means exactly one caller wins the race.
    pub fn set(&self, value: T) -> Result<(), T> {
        match self.state.compare_exchange(
            UNINIT,
            INITIALIZING,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                unsafe { (*self.value.get()).write(value) };
                self.state.store(READY, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    /// Returns the cell's value, or `None` if [`Self::set`] hasn't run yet.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Returns the cell's value, panicking if it hasn't been set.
    ///
    /// Intended for call sites past the point in boot where the value is
    /// guaranteed to exist — a panic here means the boot sequence itself is
    /// broken, not that the caller should handle absence gracefully.
    #[track_caller]
    pub fn get_or_panic(&self) -> &T {
        self.get().expect("OnceCell read before it was set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_cell_returns_none() {
        let cell: OnceCell<u32> = OnceCell::new();
        assert!(cell.get().is_none());
    }

    #[test]
    fn set_then_get_returns_value() {
        let cell = OnceCell::new();
        assert!(cell.set(42).is_ok());
        assert_eq!(cell.get(), Some(&42));
    }

    #[test]
    fn second_set_is_rejected() {
        let cell = OnceCell::new();
        assert!(cell.set(1).is_ok());
        assert_eq!(cell.set(2), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }
}
