//! A cell opting into `Send`/`Sync` for statics whose synchronization is
//! enforced by something the type system can't see (a boot-time-only
//! ordering, or a lock held in a different module).

use core::cell::UnsafeCell;

/// An `UnsafeCell<T>` that is unconditionally `Send`/`Sync`.
///
/// The caller is responsible for not racing. Used for statics that are
/// written once during single-threaded boot and read many times afterward.
#[repr(transparent)]
pub struct RacyCell<T>(UnsafeCell<T>);

unsafe impl<T> Send for RacyCell<T> {}
unsafe impl<T> Sync for RacyCell<T> {}

impl<T> RacyCell<T> {
    /// Wraps `value`.
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Returns a raw pointer to the inner value.
    pub const fn get(&self) -> *mut T {
        self.0.get()
    }

    /// Returns a mutable reference to the inner value.
    ///
    /// # Safety
    /// The caller must ensure no other reference to the inner value exists.
    pub unsafe fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.0.get() }
    }
}
