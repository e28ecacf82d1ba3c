//! Host-testable primitives shared by the kernel's memory manager and scheduler.
//!
//! This crate has no `alloc` dependency and no target-specific code, so its
//! unit tests run on the host toolchain instead of inside a VM.

#![no_std]

pub mod addr;
pub mod cell;
pub mod id;
pub mod log;
pub mod static_assert;
pub mod sync;

pub use addr::{PhysAddr, VirtAddr};
pub use id::{ClockId, CpuId};
