use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::trace;

use crate::core::trap::Interrupt;

/// S-mode software interrupt pending/enable bit.
pub const SSIP: u64 = 1 << 1;
/// M-mode software interrupt pending/enable bit.
pub const MSIP: u64 = 1 << 3;
/// S-mode timer interrupt pending/enable bit.
pub const STIP: u64 = 1 << 5;
/// M-mode timer interrupt pending/enable bit.
pub const MTIP: u64 = 1 << 7;
/// S-mode external interrupt pending/enable bit.
pub const SEIP: u64 = 1 << 9;
/// M-mode external interrupt pending/enable bit.
pub const MEIP: u64 = 1 << 11;

/// All implemented interrupt bits.
pub const VALID_INTERRUPTS_MASK: u64 = SSIP | MSIP | STIP | MTIP | SEIP | MEIP;

// Delegatable interrupts according to QEMU's implementation.
const DELEGATABLE_INTERRUPTS_MASK: u64 = SSIP | STIP | SEIP;

// Bits the interrupt fabric (CLINT, PLIC) may drive.
const DEVICE_WRITABLE_MASK: u64 = MSIP | MTIP | STIP | SEIP | MEIP;

// Bits guest software may write through the mip CSR. STIP is additionally gated on
// `menvcfg.STCE` being clear; see [`IrqHub::mip`].
const SOFTWARE_WRITABLE_MASK: u64 = SSIP | STIP | SEIP;

// medeleg bits for the defined exception causes. Bit 11 (ECALL from M) and bit 16 (double trap)
// read as zero.
const DELEGATABLE_EXCEPTIONS_MASK: u64 = 0xB3FF;

/// The interrupt-pending fabric shared between the CPU worker and the device-tick thread.
///
/// Devices assert and clear mip bits through [`set_interrupt_pending`], guest software through
/// the CSR write path; the two sets of writable bits are disjoint except for SEIP and STIP, which
/// are each the OR of a device-driven level and a software-writable bit (SEIP always, STIP only
/// while `menvcfg.STCE` is clear).
///
/// The hub also carries the `time` mirror of the timer device's mtime and the `stimecmp` compare
/// value, both of which are read on one thread and written on the other. All accesses are SeqCst
/// so an interrupt asserted by the controller is visible at the next instruction boundary.
#[derive(Debug, Default)]
pub struct IrqHub {
    mip_device: AtomicU64,
    mip_software: AtomicU64,
    time: AtomicU64,
    stimecmp: AtomicU64,
    stce: AtomicBool,
    wakeup: AtomicBool,
}

impl IrqHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises (`level == true`) or lowers the device-driven mip bits selected by `mask`.
    ///
    /// This is the only path by which MSIP, MTIP, MEIP, and the external component of SEIP and
    /// STIP may be mutated. Bits outside the device-writable set are ignored.
    pub fn set_interrupt_pending(&self, mask: u64, level: bool) {
        let mask = mask & DEVICE_WRITABLE_MASK;
        trace!("setting mip bits {mask:#x} to {level}");
        if level {
            self.mip_device.fetch_or(mask, Ordering::SeqCst);
        } else {
            self.mip_device.fetch_and(!mask, Ordering::SeqCst);
        }
    }

    /// The mip register as visible to guest software.
    pub fn mip(&self) -> u64 {
        let mut software_mask = SSIP | SEIP;
        if !self.stce() {
            software_mask |= STIP;
        }
        self.mip_device.load(Ordering::SeqCst)
            | (self.mip_software.load(Ordering::SeqCst) & software_mask)
    }

    /// CSR-side masked write of the software-writable mip bits. The caller restricts `mask`
    /// further for the sip shadow.
    pub fn write_mip_software(&self, value: u64, mask: u64) {
        let mask = mask & SOFTWARE_WRITABLE_MASK;
        self.mip_software
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |old| {
                Some(old & !mask | value & mask)
            })
            .unwrap();
    }

    /// Mirror of the timer device's mtime register, read back through the `time` CSR.
    pub fn time(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    pub fn set_time(&self, value: u64) {
        self.time.store(value, Ordering::SeqCst);
    }

    /// The stimecmp CSR value, sampled by the timer device on every tick.
    pub fn stimecmp(&self) -> u64 {
        self.stimecmp.load(Ordering::SeqCst)
    }

    pub fn set_stimecmp(&self, value: u64) {
        self.stimecmp.store(value, Ordering::SeqCst);
    }

    /// Whether `menvcfg.STCE` is set, i.e. whether STIP is driven by the timer device.
    pub fn stce(&self) -> bool {
        self.stce.load(Ordering::SeqCst)
    }

    pub fn set_stce(&self, value: bool) {
        self.stce.store(value, Ordering::SeqCst);
        if !value {
            // The timer no longer owns STIP; drop any level it left behind.
            self.mip_device.fetch_and(!STIP, Ordering::SeqCst);
        }
    }

    /// Asks a hart blocked in `wfi` to resume. Set once at shutdown and never cleared, so a
    /// stopping hart can no longer stall.
    pub fn request_wakeup(&self) {
        self.wakeup.store(true, Ordering::SeqCst);
    }

    pub fn wakeup_requested(&self) -> bool {
        self.wakeup.load(Ordering::SeqCst)
    }
}

/// The worker-private half of the interrupt state: enables and delegation.
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    mie: u64,
    mideleg: u64,
    medeleg: u64,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mie(&self) -> u64 {
        self.mie
    }

    /// The mie register is **WARL**; only the implemented interrupt bits are writable.
    pub fn write_mie(&mut self, value: u64, mask: u64) {
        let mask = mask & VALID_INTERRUPTS_MASK;
        self.mie = self.mie & !mask | value & mask;
    }

    /// The sie view: mie restricted to the delegated interrupts.
    pub fn sie(&self) -> u64 {
        self.mie & self.mideleg
    }

    /// Writes through the sie view. Only bits that are both delegated and implemented change.
    pub fn write_sie(&mut self, value: u64, mask: u64) {
        // Masking with mideleg subsumes the delegatable-interrupts mask.
        self.write_mie(value, mask & self.mideleg);
    }

    pub fn mideleg(&self) -> u64 {
        self.mideleg
    }

    /// The mideleg register is **WARL**.
    pub fn write_mideleg(&mut self, value: u64, mask: u64) {
        let mask = mask & DELEGATABLE_INTERRUPTS_MASK;
        self.mideleg = self.mideleg & !mask | value & mask;
    }

    pub fn medeleg(&self) -> u64 {
        self.medeleg
    }

    /// The medeleg register is **WARL**; bits 11 and 16 are read-only zero (ECALL-from-M and
    /// double-trap are never delegated).
    pub fn write_medeleg(&mut self, value: u64, mask: u64) {
        let mask = mask & DELEGATABLE_EXCEPTIONS_MASK;
        self.medeleg = self.medeleg & !mask | value & mask;
    }

    pub fn should_delegate_interrupt(&self, interrupt: Interrupt) -> bool {
        self.mideleg & interrupt.mask() != 0
    }

    pub fn should_delegate_exception(&self, code: u64) -> bool {
        code < 64 && self.medeleg & (1 << code) != 0
    }
}

/// The fixed interrupt priority order, highest first.
pub const PRIORITY_ORDER: [Interrupt; 6] = [
    Interrupt::MachineExternalInterrupt,
    Interrupt::MachineSoftwareInterrupt,
    Interrupt::MachineTimerInterrupt,
    Interrupt::SupervisorExternalInterrupt,
    Interrupt::SupervisorSoftwareInterrupt,
    Interrupt::SupervisorTimerInterrupt,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_and_software_bits_combine() {
        let hub = IrqHub::new();
        hub.set_interrupt_pending(MTIP | MEIP, true);
        assert_eq!(MTIP | MEIP, hub.mip());

        hub.write_mip_software(SSIP | SEIP, SSIP | SEIP);
        assert_eq!(MTIP | MEIP | SSIP | SEIP, hub.mip());

        // Software cannot touch the M-level device bits.
        hub.write_mip_software(0, MTIP | MEIP | MSIP);
        assert_eq!(MTIP | MEIP | SSIP | SEIP, hub.mip());

        hub.set_interrupt_pending(MTIP, false);
        assert_eq!(MEIP | SSIP | SEIP, hub.mip());
    }

    #[test]
    fn test_seip_is_or_of_device_and_software() {
        let hub = IrqHub::new();
        hub.set_interrupt_pending(SEIP, true);
        hub.write_mip_software(SEIP, SEIP);
        // Clearing the software bit leaves the device level visible.
        hub.write_mip_software(0, SEIP);
        assert_eq!(SEIP, hub.mip() & SEIP);
        hub.set_interrupt_pending(SEIP, false);
        assert_eq!(0, hub.mip() & SEIP);
    }

    #[test]
    fn test_stip_ownership_follows_stce() {
        let hub = IrqHub::new();
        hub.write_mip_software(STIP, STIP);
        assert_eq!(STIP, hub.mip() & STIP);

        // With STCE set, the software bit is masked out and the device drives STIP.
        hub.set_stce(true);
        assert_eq!(0, hub.mip() & STIP);
        hub.set_interrupt_pending(STIP, true);
        assert_eq!(STIP, hub.mip() & STIP);

        // Clearing STCE drops the device level and hands the bit back to software.
        hub.set_stce(false);
        assert_eq!(STIP, hub.mip() & STIP); // the software bit was still set
        hub.write_mip_software(0, STIP);
        assert_eq!(0, hub.mip() & STIP);
    }

    #[test]
    fn test_sie_respects_delegation() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mideleg(SSIP | STIP, u64::MAX);
        interrupts.write_sie(u64::MAX, u64::MAX);
        assert_eq!(SSIP | STIP, interrupts.sie());
        assert_eq!(SSIP | STIP, interrupts.mie());
    }

    #[test]
    fn test_medeleg_readonly_bits() {
        let mut interrupts = Interrupts::new();
        interrupts.write_medeleg(u64::MAX, u64::MAX);
        assert_eq!(0, interrupts.medeleg() & (1 << 11));
        assert_eq!(0, interrupts.medeleg() & (1 << 16));
        assert!(interrupts.should_delegate_exception(8));
        assert!(!interrupts.should_delegate_exception(11));
    }
}
