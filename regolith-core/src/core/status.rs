use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

// Mask to be applied to mstatus to get sstatus.
const SSTATUS_MASK: u64 = 0x8000_0003_000D_E762;

/// Provides the mstatus and sstatus registers.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus
/// > appears as the sstatus register in the S-level ISA.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    /// Returns mstatus in its reset state: MPP=M, UXL=SXL=64-bit, floating point enabled (FS
    /// dirty, hence SD), everything else clear.
    pub fn new() -> Self {
        let mut status = Self { mstatus: 0 };
        status.mstatus.view_bits_mut::<Lsb0>()[idx::UXL..idx::UXL + 2].store_le(XLEN_64);
        status.mstatus.view_bits_mut::<Lsb0>()[idx::SXL..idx::SXL + 2].store_le(XLEN_64);
        status.set_mpp(RawPrivilegeLevel::Machine);
        status.set_fs(ExtensionContextStatus::Dirty);
        status
    }

    /// Returns the raw 64-bit mstatus value.
    pub fn mstatus(&self) -> u64 {
        self.mstatus
    }

    /// Returns the sstatus view of mstatus.
    pub fn sstatus(&self) -> u64 {
        self.mstatus & SSTATUS_MASK
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap()
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The MPP field is **WARL**.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // MPP is a WARL field, so ignore illegal values.
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous Privilege level) field.
    ///
    /// The SPP field is **WARL**.
    pub fn spp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(self.mstatus.view_bits::<Lsb0>()[idx::SPP] as u8)
            .try_into()
            .unwrap()
    }

    /// Sets the privilege level encoded by the SPP (S-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The SPP field is **WARL**.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {} // SPP is a WARL field, so ignore illegal values.
        };
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    /// Sets the MPRV (Modify PRiVilege) bit to `value`.
    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the MXR (Make eXecutable Readable) bit is set.
    pub fn mxr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MXR]
    }

    /// Sets the MXR (Make eXecutable Readable) bit to `value`.
    pub fn set_mxr(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MXR, value);
    }

    /// Returns `true` if the SUM (permit Supervisor User Memory access) bit is set.
    pub fn sum(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SUM]
    }

    /// Sets the SUM (permit Supervisor User Memory access) bit to `value`.
    pub fn set_sum(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SUM, value);
    }

    /// Returns `true` if the TVM (Trap Virtual Memory) bit is set.
    ///
    /// The TVM field is **WARL**.
    pub fn tvm(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TVM]
    }

    /// Sets the TVM (Trap Virtual Memory) bit to `value`.
    ///
    /// The TVM field is **WARL**.
    pub fn set_tvm(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TVM, value)
    }

    /// Returns `true` if the TW (Timeout Wait) bit is set.
    ///
    /// The TW field is **WARL**.
    pub fn tw(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TW]
    }

    /// Sets the TW (Timeout Wait) bit to `value`.
    ///
    /// The TW field is **WARL**.
    pub fn set_tw(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TW, value)
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    ///
    /// The TSR field is **WARL**.
    pub fn tsr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TSR]
    }

    /// Sets the TSR (Trap SRET) bit to `value`.
    ///
    /// The TSR field is **WARL**.
    pub fn set_tsr(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::TSR, value)
    }

    /// Returns the extension context status encoded by the FS (F extension Status) field.
    ///
    /// The FS field is **WARL**.
    pub fn fs(&self) -> ExtensionContextStatus {
        ExtensionContextStatus::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::FS..(idx::FS + 2)].load_le(),
        )
    }

    /// Sets the extension context status encoded by the FS (F extension Status) field to `value`.
    ///
    /// The FS field is **WARL**.
    pub fn set_fs(&mut self, value: ExtensionContextStatus) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::FS..(idx::FS + 2)].store_le(value as u8);
        self.update_sd();
    }

    /// Returns `true` if the SD (extension Status Dirty) bit is set.
    pub fn sd(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SD]
    }

    // The V and X extensions are absent, so SD depends on FS alone.
    fn update_sd(&mut self) {
        let dirty = self.fs() == ExtensionContextStatus::Dirty;
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SD, dirty);
    }

    /// Overwrites the fields selected by `mask` with the corresponding bits of `value`, treating
    /// WARL fields correctly. Read-only fields (UXL, SXL, SD) and WPRI fields are unaffected.
    pub fn write_mstatus(&mut self, value: u64, mask: u64) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let updated = self.mstatus & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();

        if mask_bits[idx::SIE] {
            self.set_sie(updated_bits[idx::SIE]);
        }
        if mask_bits[idx::MIE] {
            self.set_mie(updated_bits[idx::MIE]);
        }
        if mask_bits[idx::SPIE] {
            self.set_spie(updated_bits[idx::SPIE]);
        }
        if mask_bits[idx::MPIE] {
            self.set_mpie(updated_bits[idx::MPIE]);
        }
        if mask_bits[idx::SPP] {
            self.set_spp(RawPrivilegeLevel::from_u2(updated_bits[idx::SPP] as u8));
        }
        if mask_bits[idx::MPP] | mask_bits[idx::MPP + 1] {
            self.set_mpp(RawPrivilegeLevel::from_u2(
                updated_bits[idx::MPP..(idx::MPP + 2)].load_le(),
            ));
        }
        if mask_bits[idx::FS] | mask_bits[idx::FS + 1] {
            self.set_fs(ExtensionContextStatus::from_u2(
                updated_bits[idx::FS..(idx::FS + 2)].load_le(),
            ));
        }
        if mask_bits[idx::MPRV] {
            self.set_mprv(updated_bits[idx::MPRV]);
        }
        if mask_bits[idx::SUM] {
            self.set_sum(updated_bits[idx::SUM]);
        }
        if mask_bits[idx::MXR] {
            self.set_mxr(updated_bits[idx::MXR]);
        }
        if mask_bits[idx::TVM] {
            self.set_tvm(updated_bits[idx::TVM]);
        }
        if mask_bits[idx::TW] {
            self.set_tw(updated_bits[idx::TW]);
        }
        if mask_bits[idx::TSR] {
            self.set_tsr(updated_bits[idx::TSR]);
        }
        // Ignore read-only fields, and the remaining WPRI fields.
    }

    /// Writes through the sstatus view: like [`write_mstatus`](Self::write_mstatus) with the mask
    /// restricted to the S-visible fields.
    pub fn write_sstatus(&mut self, value: u64, mask: u64) {
        self.write_mstatus(value, mask & SSTATUS_MASK);
    }
}

/// MXL/SXL/UXL encoding for a 64-bit ISA width.
const XLEN_64: u8 = 2;

/// Bit indices into the mstatus register.
mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const FS: usize = 13;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    pub const UXL: usize = 32;
    pub const SXL: usize = 34;
    pub const SD: usize = 63;
}

/// Possible values of the extension context status field (FS) in the mstatus register.
///
/// > | Status | FS Meaning |
/// > | ------ | ---------- |
/// > | 0      | Off        |
/// > | 1      | Initial    |
/// > | 2      | Clean      |
/// > | 3      | Dirty      |
///
/// > When an extension’s status is set to Off, any instruction that attempts to read or write the
/// > corresponding state will cause an illegal instruction exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtensionContextStatus {
    Off = 0,
    Initial = 1,
    Clean = 2,
    Dirty = 3,
}

impl ExtensionContextStatus {
    /// Convert a 2-bit value into an [`ExtensionContextStatus`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::Off,
            1 => Self::Initial,
            2 => Self::Clean,
            3 => Self::Dirty,
            _ => panic!("out of range u2 used"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let status = Status::new();
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        assert_eq!(ExtensionContextStatus::Dirty, status.fs());
        assert!(status.sd());
        assert!(!status.mie());
        // UXL and SXL read as the 64-bit encoding.
        assert_eq!(2, (status.mstatus() >> 32) & 0b11);
        assert_eq!(2, (status.mstatus() >> 34) & 0b11);
    }

    #[test]
    fn test_sd_follows_fs() {
        let mut status = Status::new();
        status.set_fs(ExtensionContextStatus::Clean);
        assert!(!status.sd());
        status.set_fs(ExtensionContextStatus::Dirty);
        assert!(status.sd());
    }

    #[test]
    fn test_mpp_warl() {
        let mut status = Status::new();
        status.set_mpp(RawPrivilegeLevel::User);
        assert_eq!(PrivilegeLevel::User, status.mpp());
        // The reserved level is ignored.
        status.set_mpp(RawPrivilegeLevel::Reserved);
        assert_eq!(PrivilegeLevel::User, status.mpp());
    }

    #[test]
    fn test_sstatus_masks_m_fields() {
        let mut status = Status::new();
        status.set_mie(true);
        status.set_sie(true);
        status.set_tsr(true);
        let sstatus = status.sstatus();
        assert_eq!(0, sstatus & (1 << 3)); // MIE hidden
        assert_ne!(0, sstatus & (1 << 1)); // SIE visible
        assert_eq!(0, sstatus & (1 << 22)); // TSR hidden

        // Writes through sstatus cannot touch M-level fields.
        status.write_sstatus(0, u64::MAX);
        assert!(status.mie());
        assert!(!status.sie());
    }

    #[test]
    fn test_write_mstatus_respects_mask() {
        let mut status = Status::new();
        status.write_mstatus(1 << 3, 1 << 3);
        assert!(status.mie());
        status.write_mstatus(0, 1 << 1);
        assert!(status.mie());
        assert!(!status.sie());
    }
}
