//! The cooperative scheduler: per-CPU run-loop state, the timer heap, and
//! the bounded thunk queues threads and bottom halves move through.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cpuinfo;
pub mod queue;
pub mod runloop;
pub mod timer;

pub use cpuinfo::{CpuInfo, CpuState, IdleBitmap, MAX_CPUS};
pub use queue::{BoundedQueue, Thunk, DEFAULT_CAPACITY};
pub use runloop::{runloop_internal, RunloopPlatform};
pub use timer::{TimerError, TimerHeap};
