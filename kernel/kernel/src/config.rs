//! Build-time configuration constants.
//!
//! In a full build these would be re-exported from a generated config crate
//! driven by the build's target/profile; this repository has no such
//! code-generation step, so the constants are plain `pub const` items here.

/// Highest log level compiled in. Anything more severe than this is a no-op
/// call site rather than a string that gets formatted and then discarded.
pub const MAX_LOG_LEVEL: vesper_core::log::LogLevel = vesper_core::log::LogLevel::Trace;

/// Maximum number of logical CPUs this build supports.
pub const MAX_CPUS: usize = vesper_sched::MAX_CPUS;

/// Size of the linearly-backed kernel heap, in bytes.
pub const KERNEL_HEAP_SIZE: u64 = 16 * 1024 * 1024;

/// Minimum delta, in timer ticks, the platform timer will be reprogrammed to.
pub const RUNLOOP_TIMER_MIN: u64 = 50;

/// Maximum delta, in timer ticks, the platform timer will be reprogrammed to.
pub const RUNLOOP_TIMER_MAX: u64 = 10_000_000;

/// Number of times the hardware RNG chain retries RDSEED before falling
/// back to RDRAND, and RDRAND before falling back to the monotonic clock.
pub const HWRAND_RETRY_LIMIT: u32 = 128;

/// Compiled target triple, set by the build's `build.rs` via `TARGET`.
pub const TARGET: &str = match option_env!("TARGET") {
    Some(target) => target,
    None => "unknown-unknown-unknown",
};

/// Build profile ("debug" or "release").
pub const PROFILE: &str = if cfg!(debug_assertions) { "debug" } else { "release" };

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
