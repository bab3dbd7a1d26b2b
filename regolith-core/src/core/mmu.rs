//! Virtual-to-physical address translation and the hart's memory access paths.
//!
//! When the effective privilege is below M and `satp` selects Sv39, every access walks the
//! three-level page table; otherwise addresses are passed through unchanged. The MMU also owns
//! the hart's single LR/SC reservation.

use std::sync::Arc;

use log::trace;

use crate::bits::{bit, bits, sext};
use crate::bus::Bus;
use crate::core::csr::SatpMode;
use crate::core::trap::{Exception, Trap};
use crate::core::Hart;
use crate::instruction::InsnLen;
use crate::{Alignment, PrivilegeLevel};

const PAGE_SHIFT: u32 = 12;
const PTE_SIZE: u64 = 8;
const LEVELS: u32 = 3;

/// What an access is for; selects the permission check and the fault causes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum AccessType {
    Fetch,
    Load,
    Store,
}

impl AccessType {
    fn page_fault(self) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionPageFault,
            Self::Load => Exception::LoadPageFault,
            Self::Store => Exception::StoreOrAmoPageFault,
        }
    }

    fn access_fault(self) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionAccessFault,
            Self::Load => Exception::LoadAccessFault,
            Self::Store => Exception::StoreOrAmoAccessFault,
        }
    }
}

/// Sv39 page-table entry field accessors.
#[derive(Debug, Copy, Clone)]
struct Pte(u64);

impl Pte {
    fn v(self) -> bool {
        bit(self.0, 0)
    }
    fn r(self) -> bool {
        bit(self.0, 1)
    }
    fn w(self) -> bool {
        bit(self.0, 2)
    }
    fn x(self) -> bool {
        bit(self.0, 3)
    }
    fn u(self) -> bool {
        bit(self.0, 4)
    }
    fn a(self) -> bool {
        bit(self.0, 6)
    }
    fn d(self) -> bool {
        bit(self.0, 7)
    }
    fn ppn(self) -> u64 {
        bits(self.0, 53, 10)
    }
    /// The reserved high bits; any of them set makes the PTE malformed.
    fn reserved(self) -> u64 {
        bits(self.0, 63, 54)
    }
}

/// The hart's view of the memory system.
///
/// Carries the bus, the LR/SC reservation, and the translation logic. Entry points take the
/// faulting `pc` so any trap they raise records the correct instruction address.
#[derive(Debug)]
pub struct Mmu {
    bus: Arc<Bus>,
    /// Physical address of the active LR reservation, if any.
    reservation: Option<u64>,
}

impl Mmu {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            reservation: None,
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Fetches the instruction word at the hart's PC, handling compressed instructions that
    /// straddle a page boundary: the second halfword is translated separately.
    pub fn ifetch(&mut self, hart: &Hart) -> Result<(u32, InsnLen), Trap> {
        let pc = hart.pc();
        if !Alignment::HALFWORD.is_aligned(pc) {
            return Err(Trap::new(pc, Exception::InstructionAddressMisaligned, pc));
        }
        let lo = self.fetch_halfword(hart, pc, pc)?;
        if InsnLen::of(lo as u32) == InsnLen::Compressed {
            return Ok((lo as u32, InsnLen::Compressed));
        }
        let hi = self.fetch_halfword(hart, pc.wrapping_add(2), pc)?;
        Ok(((hi as u32) << 16 | lo as u32, InsnLen::Normal))
    }

    fn fetch_halfword(&self, hart: &Hart, vaddr: u64, pc: u64) -> Result<u16, Trap> {
        let paddr = self.translate(hart, pc, vaddr, AccessType::Fetch)?;
        self.bus
            .read_u16(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::InstructionAccessFault, vaddr))
    }

    /// Clears the LR reservation if `paddr` matches it exactly.
    fn invalidate_reservation(&mut self, paddr: u64) {
        if self.reservation == Some(paddr) {
            self.reservation = None;
        }
    }

    /// Load-reserved: performs the aligned load and registers the reservation.
    pub fn load_reserved_u32(&mut self, hart: &Hart, pc: u64, vaddr: u64) -> Result<u32, Trap> {
        if !Alignment::WORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::LoadAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Load)?;
        let value = self
            .bus
            .read_u32(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::LoadAccessFault, vaddr))?;
        self.reservation = Some(paddr);
        Ok(value)
    }

    /// Load-reserved, doubleword variant.
    pub fn load_reserved_u64(&mut self, hart: &Hart, pc: u64, vaddr: u64) -> Result<u64, Trap> {
        if !Alignment::DOUBLEWORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::LoadAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Load)?;
        let value = self
            .bus
            .read_u64(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::LoadAccessFault, vaddr))?;
        self.reservation = Some(paddr);
        Ok(value)
    }

    /// Store-conditional: writes only if the reservation still covers `vaddr`'s translation.
    /// Returns 0 on success and 1 on failure; the reservation is cleared either way.
    pub fn store_conditional_u32(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        value: u32,
    ) -> Result<u64, Trap> {
        if !Alignment::WORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Store)?;
        match self.reservation.take() {
            Some(reserved) if reserved == paddr => {
                if !self.bus.write_u32(paddr, value) {
                    return Err(Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr));
                }
                Ok(0)
            }
            _ => Ok(1),
        }
    }

    /// Store-conditional, doubleword variant.
    pub fn store_conditional_u64(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        value: u64,
    ) -> Result<u64, Trap> {
        if !Alignment::DOUBLEWORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Store)?;
        match self.reservation.take() {
            Some(reserved) if reserved == paddr => {
                if !self.bus.write_u64(paddr, value) {
                    return Err(Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr));
                }
                Ok(0)
            }
            _ => Ok(1),
        }
    }

    /// Atomic read-modify-write of an aligned word. Both halves use the store permission and
    /// the store fault causes, per the A extension.
    pub fn amo_u32(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        f: impl FnOnce(u32) -> u32,
    ) -> Result<u32, Trap> {
        if !Alignment::WORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Store)?;
        let old = self
            .bus
            .read_u32(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr))?;
        if !self.bus.write_u32(paddr, f(old)) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr));
        }
        self.invalidate_reservation(paddr);
        Ok(old)
    }

    /// Atomic read-modify-write of an aligned doubleword.
    pub fn amo_u64(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        f: impl FnOnce(u64) -> u64,
    ) -> Result<u64, Trap> {
        if !Alignment::DOUBLEWORD.is_aligned(vaddr) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAddressMisaligned, vaddr));
        }
        let paddr = self.translate(hart, pc, vaddr, AccessType::Store)?;
        let old = self
            .bus
            .read_u64(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr))?;
        if !self.bus.write_u64(paddr, f(old)) {
            return Err(Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr));
        }
        self.invalidate_reservation(paddr);
        Ok(old)
    }

    /// Effective privilege for data accesses: MPP when `mstatus.MPRV` is set, the current
    /// privilege otherwise. Instruction fetches always use the current privilege.
    fn effective_privilege(&self, hart: &Hart, access: AccessType) -> PrivilegeLevel {
        match access {
            AccessType::Fetch => hart.privilege(),
            _ if hart.status().mprv() => hart.status().mpp(),
            _ => hart.privilege(),
        }
    }

    fn translate(
        &self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        access: AccessType,
    ) -> Result<u64, Trap> {
        let privilege = self.effective_privilege(hart, access);
        if privilege == PrivilegeLevel::Machine {
            return Ok(vaddr);
        }
        match hart.satp().mode() {
            SatpMode::Bare => Ok(vaddr),
            SatpMode::Sv39 => self.walk_sv39(hart, pc, vaddr, access, privilege),
        }
    }

    /// The standard Sv39 three-level walk.
    fn walk_sv39(
        &self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        access: AccessType,
        privilege: PrivilegeLevel,
    ) -> Result<u64, Trap> {
        let page_fault = || Trap::new(pc, access.page_fault(), vaddr);
        let access_fault = || Trap::new(pc, access.access_fault(), vaddr);

        // The address must be canonical: bits 63:39 equal to bit 38.
        if sext(vaddr, 39) != vaddr {
            return Err(page_fault());
        }

        let status = hart.status();
        let mut a = hart.satp().ppn() << PAGE_SHIFT;
        let mut i = LEVELS - 1;
        let pte = loop {
            let vpn = bits(vaddr, 12 + 9 * i + 8, 12 + 9 * i);
            let pte_addr = a + vpn * PTE_SIZE;
            let pte = Pte(self.bus.read_u64(pte_addr).ok_or_else(access_fault)?);

            if !pte.v() || (!pte.r() && pte.w()) || pte.reserved() != 0 {
                return Err(page_fault());
            }

            if pte.r() || pte.x() {
                break (pte, pte_addr);
            }

            // A pointer to the next level; D, A, and U are reserved here.
            if pte.d() || pte.a() || pte.u() {
                return Err(page_fault());
            }
            if i == 0 {
                return Err(page_fault());
            }
            i -= 1;
            a = pte.ppn() << PAGE_SHIFT;
        };
        let (pte, pte_addr) = pte;

        // Superpage alignment: the low PPN slices must be zero.
        if i > 0 && bits(pte.ppn(), 9 * i - 1, 0) != 0 {
            return Err(page_fault());
        }

        // User/supervisor page ownership.
        match privilege {
            PrivilegeLevel::User => {
                if !pte.u() {
                    return Err(page_fault());
                }
            }
            PrivilegeLevel::Supervisor => {
                if pte.u() && (access == AccessType::Fetch || !status.sum()) {
                    return Err(page_fault());
                }
            }
            PrivilegeLevel::Machine => unreachable!("M-mode accesses are not translated"),
        }

        // Permission for the access kind; MXR lets loads read execute-only pages.
        let allowed = match access {
            AccessType::Fetch => pte.x(),
            AccessType::Load => pte.r() || (status.mxr() && pte.x()),
            AccessType::Store => pte.w(),
        };
        if !allowed {
            return Err(page_fault());
        }

        // Accessed/dirty maintenance.
        if !pte.a() || (access == AccessType::Store && !pte.d()) {
            if !hart.envcfg().adue() {
                return Err(page_fault());
            }
            let mut updated = pte.0 | 1 << 6;
            if access == AccessType::Store {
                updated |= 1 << 7;
            }
            if !self.bus.write_u64(pte_addr, updated) {
                return Err(access_fault());
            }
            trace!("updated A/D bits of PTE at {pte_addr:#x}");
        }

        let pa = if i > 0 {
            // Superpage: splice the low VPN slices of the virtual address into the PPN.
            let keep = 9 * i + PAGE_SHIFT;
            (pte.ppn() << PAGE_SHIFT) & !((1 << keep) - 1) | bits(vaddr, keep - 1, 0)
        } else {
            pte.ppn() << PAGE_SHIFT | bits(vaddr, 11, 0)
        };
        Ok(pa)
    }

    fn read_byte(&self, hart: &Hart, pc: u64, vaddr: u64) -> Result<u8, Trap> {
        let paddr = self.translate(hart, pc, vaddr, AccessType::Load)?;
        self.bus
            .read_u8(paddr)
            .ok_or_else(|| Trap::new(pc, Exception::LoadAccessFault, vaddr))
    }

    /// Two-phase misaligned store: translate every byte and confirm there is an owner, then
    /// perform the byte writes. A fault on any byte is raised before any write happens.
    fn write_bytes_unaligned(
        &mut self,
        hart: &Hart,
        pc: u64,
        vaddr: u64,
        bytes: &[u8],
    ) -> Result<(), Trap> {
        let mut paddrs = [0u64; 8];
        for (offset, slot) in paddrs[..bytes.len()].iter_mut().enumerate() {
            let paddr = self.translate(
                hart,
                pc,
                vaddr.wrapping_add(offset as u64),
                AccessType::Store,
            )?;
            if !self.bus.accessible(paddr) {
                return Err(Trap::new(
                    pc,
                    Exception::StoreOrAmoAccessFault,
                    vaddr.wrapping_add(offset as u64),
                ));
            }
            *slot = paddr;
        }
        for (&paddr, &byte) in paddrs[..bytes.len()].iter().zip(bytes) {
            self.bus.write_u8(paddr, byte);
            self.invalidate_reservation(paddr);
        }
        Ok(())
    }
}

macro_rules! memory_access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        impl Mmu {
            $(
                /// Reads a value from virtual memory during instruction execution. A misaligned
                /// access is split into byte accesses, each translated separately.
                pub fn $read_fn(&mut self, hart: &Hart, pc: u64, vaddr: u64) -> Result<$u, Trap> {
                    const SIZE: usize = std::mem::size_of::<$u>();
                    if Alignment::natural_for_size(SIZE as u64).unwrap().is_aligned(vaddr) {
                        let paddr = self.translate(hart, pc, vaddr, AccessType::Load)?;
                        return self
                            .bus
                            .$read_fn(paddr)
                            .ok_or_else(|| Trap::new(pc, Exception::LoadAccessFault, vaddr));
                    }
                    let mut bytes = [0u8; SIZE];
                    for (offset, byte) in bytes.iter_mut().enumerate() {
                        *byte = self.read_byte(hart, pc, vaddr.wrapping_add(offset as u64))?;
                    }
                    Ok($u::from_le_bytes(bytes))
                }

                /// Writes a value to virtual memory during instruction execution. A store that
                /// faults must not have performed any partial write; misaligned stores
                /// translate every byte before the first write.
                pub fn $write_fn(
                    &mut self,
                    hart: &Hart,
                    pc: u64,
                    vaddr: u64,
                    value: $u,
                ) -> Result<(), Trap> {
                    const SIZE: usize = std::mem::size_of::<$u>();
                    if Alignment::natural_for_size(SIZE as u64).unwrap().is_aligned(vaddr) {
                        let paddr = self.translate(hart, pc, vaddr, AccessType::Store)?;
                        if !self.bus.$write_fn(paddr, value) {
                            return Err(Trap::new(pc, Exception::StoreOrAmoAccessFault, vaddr));
                        }
                        self.invalidate_reservation(paddr);
                        return Ok(());
                    }
                    self.write_bytes_unaligned(hart, pc, vaddr, &value.to_le_bytes())
                }
            )*
        }
    };
}

memory_access_fns! {
    read_u8, write_u8 => u8,
    read_u16, write_u16 => u16,
    read_u32, write_u32 => u32,
    read_u64, write_u64 => u64,
}
