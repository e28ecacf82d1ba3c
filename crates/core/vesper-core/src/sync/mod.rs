//! Host-testable synchronization primitives for `no_std` kernel code.
//!
//! Primitives that need to mask interrupts (`IrqSpinLock`, the scheduler's
//! `KernelLock`) are architecture-specific and live in `vesper-kernel`
//! instead of here — this crate only holds the interrupt-agnostic building
//! blocks so its tests run on the host toolchain.

mod lazy;
mod once;
mod spinlock;

pub use lazy::LazyLock;
pub use once::OnceCell;
pub use spinlock::{SpinLock, SpinLockGuard};
