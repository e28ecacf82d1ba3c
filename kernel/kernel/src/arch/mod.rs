//! Architecture-specific primitives: port I/O, CPUID-based feature
//! detection, and the APIC/IPI wrappers the scheduler drives through.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64 as current;

#[cfg(target_arch = "x86_64")]
pub use x86_64::serial;

#[cfg(target_arch = "x86_64")]
pub use x86_64::{disable_interrupts, enable_and_hlt, enable_interrupts, interrupts_enabled};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("vesper-kernel currently only implements the x86_64 arch backend");
