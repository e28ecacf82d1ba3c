//! The big kernel lock the run loop takes once per pass.
//!
//! Unlike [`IrqSpinLock`](super::irq_spinlock::IrqSpinLock), interrupts stay
//! enabled while spinning to wait for the lock — only the final acquisition
//! disables them, right before the guard is handed back. This lets an
//! interrupt land on a spinning CPU instead of stalling it with IF clear for
//! however long the lock is contended, while still guaranteeing the holder
//! runs with interrupts off for its (short) critical section.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// A lock held with interrupts disabled, but spun on with them enabled.
pub struct KernelLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for KernelLock<T> {}
unsafe impl<T: Send> Sync for KernelLock<T> {}

impl<T> KernelLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Spins with interrupts enabled, then disables them and takes the lock.
    pub fn lock(&self) -> KernelLockGuard<'_, T> {
        loop {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
            arch::disable_interrupts();
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return KernelLockGuard { lock: self };
            }
            arch::enable_interrupts();
        }
    }

    /// Attempts to take the lock without spinning. Used by the run loop,
    /// which must never block waiting for the kernel lock.
    pub fn try_lock(&self) -> Option<KernelLockGuard<'_, T>> {
        arch::disable_interrupts();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(KernelLockGuard { lock: self })
        } else {
            arch::enable_interrupts();
            None
        }
    }
}

/// RAII guard; dropping it releases the lock and re-enables interrupts.
pub struct KernelLockGuard<'a, T> {
    lock: &'a KernelLock<T>,
}

impl<T> Deref for KernelLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for KernelLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for KernelLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        arch::enable_interrupts();
    }
}

impl<T> !Send for KernelLockGuard<'_, T> {}
