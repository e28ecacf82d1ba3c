//! Local APIC driver: MMIO register access, timer programming, and IPIs.
//!
//! The run loop and SMP bring-up drive the rest of the kernel through this
//! type rather than touching LAPIC registers directly.

use vesper_core::addr::VirtAddr;

const REG_ID: u32 = 0x020;
const REG_VERSION: u32 = 0x030;
const REG_TPR: u32 = 0x080;
const REG_EOI: u32 = 0x0B0;
const REG_SVR: u32 = 0x0F0;
const REG_ICR_LOW: u32 = 0x300;
const REG_ICR_HIGH: u32 = 0x310;
const REG_LVT_TIMER: u32 = 0x320;
const REG_TIMER_INITIAL: u32 = 0x380;
const REG_TIMER_CURRENT: u32 = 0x390;
const REG_TIMER_DIVIDE: u32 = 0x3E0;

const SVR_ENABLE: u32 = 1 << 8;
const TIMER_PERIODIC: u32 = 1 << 17;
const TIMER_MASKED: u32 = 1 << 16;
const ICR_DELIVERY_PENDING: u32 = 1 << 12;

/// MSR address for the APIC base.
pub const IA32_APIC_BASE_MSR: u32 = 0x1B;

/// Local APIC driver using MMIO register access.
pub struct LocalApic {
    base: VirtAddr,
}

impl LocalApic {
    /// # Safety
    /// `virt_base` must be a valid mapping of the LAPIC MMIO region
    /// (at least 4 KiB, device memory).
    pub unsafe fn new(virt_base: VirtAddr) -> Self {
        Self { base: virt_base }
    }

    pub fn id(&self) -> u8 {
        ((self.read_reg(REG_ID) >> 24) & 0xFF) as u8
    }

    pub fn version(&self) -> u32 {
        self.read_reg(REG_VERSION)
    }

    pub fn enable(&self, spurious_vector: u8) {
        self.write_reg(REG_SVR, SVR_ENABLE | u32::from(spurious_vector));
    }

    pub fn eoi(&self) {
        self.write_reg(REG_EOI, 0);
    }

    pub fn set_tpr(&self, priority: u8) {
        self.write_reg(REG_TPR, u32::from(priority));
    }

    pub fn start_timer_periodic(&self, vector: u8, initial_count: u32, divide: u8) {
        self.write_reg(REG_TIMER_DIVIDE, divide_config(divide));
        self.write_reg(REG_LVT_TIMER, TIMER_PERIODIC | u32::from(vector));
        self.write_reg(REG_TIMER_INITIAL, initial_count);
    }

    pub fn start_timer_oneshot(&self, vector: u8, initial_count: u32, divide: u8) {
        self.write_reg(REG_TIMER_DIVIDE, divide_config(divide));
        self.write_reg(REG_LVT_TIMER, u32::from(vector));
        self.write_reg(REG_TIMER_INITIAL, initial_count);
    }

    pub fn stop_timer(&self) {
        self.write_reg(REG_LVT_TIMER, TIMER_MASKED);
    }

    pub fn timer_current_count(&self) -> u32 {
        self.read_reg(REG_TIMER_CURRENT)
    }

    /// Sends a fixed-delivery, physical-destination IPI to `target_apic_id`.
    ///
    /// # Safety
    /// The caller must ensure the target APIC ID is online and `vector` is
    /// routed to a handler that can run on it.
    pub unsafe fn send_ipi(&self, target_apic_id: u8, vector: u8) {
        self.write_reg(REG_ICR_HIGH, u32::from(target_apic_id) << 24);
        self.write_reg(REG_ICR_LOW, u32::from(vector));
        while self.read_reg(REG_ICR_LOW) & ICR_DELIVERY_PENDING != 0 {
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn read_reg(&self, offset: u32) -> u32 {
        // SAFETY: `new`'s caller guarantees `self.base` maps the LAPIC page;
        // every offset used here falls within it.
        unsafe {
            let ptr = (self.base.as_u64() + u64::from(offset)) as *const u32;
            core::ptr::read_volatile(ptr)
        }
    }

    #[inline]
    fn write_reg(&self, offset: u32, value: u32) {
        // SAFETY: see read_reg.
        unsafe {
            let ptr = (self.base.as_u64() + u64::from(offset)) as *mut u32;
            core::ptr::write_volatile(ptr, value);
        }
    }
}

const APIC_BASE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Reads the LAPIC's physical base address out of `IA32_APIC_BASE`.
pub fn read_apic_base_msr() -> vesper_core::PhysAddr {
    let (low, high): (u32, u32);
    unsafe {
        core::arch::asm!(
            "rdmsr",
            in("ecx") IA32_APIC_BASE_MSR,
            out("eax") low,
            out("edx") high,
            options(nomem, nostack),
        );
    }
    let value = (u64::from(high) << 32) | u64::from(low);
    vesper_core::PhysAddr::new_truncate(value & APIC_BASE_ADDR_MASK)
}

fn divide_config(divide: u8) -> u32 {
    match divide {
        1 => 0b1011,
        2 => 0b0000,
        4 => 0b0001,
        8 => 0b0010,
        16 => 0b0011,
        32 => 0b1000,
        64 => 0b1001,
        128 => 0b1010,
        _ => 0b0011,
    }
}
