//! Architecture-specific locking primitives that need to mask interrupts.
//!
//! The interrupt-agnostic primitives ([`SpinLock`](vesper_core::sync::SpinLock),
//! [`LazyLock`](vesper_core::sync::LazyLock)) live in `vesper-core` where they
//! stay host-testable. Everything here needs real `cli`/`sti`, so it lives
//! next to the rest of the arch backend instead.

mod irq_spinlock;
mod kernel_lock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use kernel_lock::{KernelLock, KernelLockGuard};
