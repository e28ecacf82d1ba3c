//! Hardware RNG seeding: RDSEED first, RDRAND second, monotonic clock last.

use crate::arch::x86_64::cpuid;
use crate::config::HWRAND_RETRY_LIMIT;

/// The hardware entropy sources this boot found available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRandCapabilities {
    pub rdseed: bool,
    pub rdrand: bool,
}

/// Probes CPUID for RDSEED/RDRAND support. Call once during new-stack init.
pub fn init_hwrand() -> HwRandCapabilities {
    HwRandCapabilities {
        rdseed: cpuid::has_rdseed(),
        rdrand: cpuid::has_rdrand(),
    }
}

/// Produces a random 64-bit seed, trying RDSEED up to [`HWRAND_RETRY_LIMIT`]
/// times, then RDRAND the same number of times, then falling back to a
/// monotonic clock reading so the function always returns a value.
pub fn random_seed(caps: HwRandCapabilities, monotonic_now: impl Fn() -> u64) -> u64 {
    if caps.rdseed {
        for _ in 0..HWRAND_RETRY_LIMIT {
            if let Some(value) = cpuid::rdseed64() {
                return value;
            }
            core::hint::spin_loop();
        }
    }
    if caps.rdrand {
        for _ in 0..HWRAND_RETRY_LIMIT {
            if let Some(value) = cpuid::rdrand64() {
                return value;
            }
            core::hint::spin_loop();
        }
    }
    monotonic_now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_clock_when_no_hardware_source() {
        let caps = HwRandCapabilities { rdseed: false, rdrand: false };
        assert_eq!(random_seed(caps, || 42), 42);
    }
}
