//! Monotonic clock source: the invariant TSC, read directly with `rdtsc`.
//!
//! This is the fallback tail of the hardware RNG chain (see
//! [`crate::rand::random_seed`]) and the "now" the run loop services timers
//! against. A real platform would calibrate this against the HPET or PIT to
//! convert ticks to wall-clock time; this kernel uses raw TSC ticks as its
//! timer domain directly; `clock_hz` is informational only.

/// Reads the time-stamp counter.
pub fn read_tsc() -> u64 {
    let high: u32;
    let low: u32;
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") low,
            out("edx") high,
            options(nomem, nostack),
        );
    }
    (u64::from(high) << 32) | u64::from(low)
}
