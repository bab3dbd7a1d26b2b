//! The hart: architectural state, the CSR front door, trap entry, and interrupt selection.

pub mod csr;
mod counters;
mod envcfg;
pub mod execute;
pub mod float;
pub mod interrupts;
mod mmu;
mod status;
pub mod trap;

use std::sync::Arc;

use log::trace;

use crate::registers::{FRegisters, Registers, Specifier};
use crate::{PrivilegeLevel, RawPrivilegeLevel};
use csr::{CsrSpecifier, Fcsr, Satp, TrapCsrs};
use trap::{Cause, Trap};

pub use counters::Counters;
pub use envcfg::Envcfg;
pub use interrupts::{Interrupts, IrqHub};
pub use mmu::Mmu;
pub use status::{ExtensionContextStatus, Status};

#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the integer ID of the
    /// > hardware thread running the code. This register must be readable in any implementation.
    pub hart_id: u64,
    /// Address to which the hart's PC register is reset.
    pub reset_vector: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hart_id: 0,
            reset_vector: crate::dram::DRAM_BASE,
        }
    }
}

/// A single RV64GC hart.
///
/// Owns the PC, the integer and floating-point register files, the privilege mode, and all CSRs.
/// The interrupt-pending bits live on the shared [`IrqHub`] because devices assert them from the
/// controller thread; everything else is private to the CPU worker.
#[derive(Debug)]
pub struct Hart {
    config: Config,
    pc: u64,
    privilege: PrivilegeLevel,
    registers: Registers,
    fregisters: FRegisters,
    status: Status,
    interrupts: Interrupts,
    counters: Counters,
    envcfg: Envcfg,
    trap_csrs: TrapCsrs,
    satp: Satp,
    fcsr: Fcsr,
    pmpaddr: [u64; 64],
    hub: Arc<IrqHub>,
}

impl Hart {
    /// The misa CSR value: MXL=64 with extensions I, M, A, F, D, C, S, and U.
    pub const MISA: u64 = (2 << 62)
        | (1 << 0) // A
        | (1 << 2) // C
        | (1 << 3) // D
        | (1 << 5) // F
        | (1 << 8) // I
        | (1 << 12) // M
        | (1 << 18) // S
        | (1 << 20); // U
    /// The mvendorid CSR is 0 to indicate this is a non-commercial implementation.
    pub const MVENDORID: u64 = 0;
    /// The marchid CSR is 0 to indicate it is not implemented.
    pub const MARCHID: u64 = 0;
    /// The mimpid CSR holds the implementation version.
    pub const MIMPID: u64 = 0x10;

    pub fn new(hub: Arc<IrqHub>, config: Config) -> Self {
        Self {
            pc: config.reset_vector,
            config,
            privilege: PrivilegeLevel::Machine,
            registers: Registers::new(0),
            fregisters: FRegisters::new(),
            status: Status::new(),
            interrupts: Interrupts::new(),
            counters: Counters::new(),
            envcfg: Envcfg::new(),
            trap_csrs: TrapCsrs::new(),
            satp: Satp::new(),
            fcsr: Fcsr::new(),
            pmpaddr: [0; 64],
            hub,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn fregisters(&self) -> &FRegisters {
        &self.fregisters
    }

    pub fn fregisters_mut(&mut self) -> &mut FRegisters {
        &mut self.fregisters
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    pub fn satp(&self) -> Satp {
        self.satp
    }

    pub fn envcfg(&self) -> &Envcfg {
        &self.envcfg
    }

    /// The shared interrupt fabric. Devices keep a clone of this to assert mip bits.
    pub fn hub(&self) -> &Arc<IrqHub> {
        &self.hub
    }

    pub(crate) fn fcsr(&self) -> &Fcsr {
        &self.fcsr
    }

    pub(crate) fn fcsr_mut(&mut self) -> &mut Fcsr {
        &mut self.fcsr
    }

    /// Marks the floating-point unit state dirty. Every FP register or fcsr write does this.
    pub(crate) fn set_fs_dirty(&mut self) {
        self.status.set_fs(ExtensionContextStatus::Dirty);
    }

    pub(crate) fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    pub(crate) fn interrupts(&self) -> &Interrupts {
        &self.interrupts
    }

    /// Shortcut for reading an `x` register.
    pub fn x(&self, specifier: Specifier) -> u64 {
        self.registers.x(specifier)
    }

    /// Shortcut for writing an `x` register.
    pub fn set_x(&mut self, specifier: Specifier, value: u64) {
        self.registers.set_x(specifier, value);
    }

    /// Takes a trap: updates the target mode's epc/cause/tval and status stack, then redirects
    /// the PC through the corresponding tvec.
    ///
    /// The target privilege is M unless the executing privilege is S or U and the corresponding
    /// delegation register has the cause's bit set, in which case the trap enters S-mode.
    pub fn handle_trap(&mut self, trap: Trap) {
        let delegated = self.privilege <= PrivilegeLevel::Supervisor
            && match trap.cause {
                Cause::Interrupt(i) => self.interrupts.should_delegate_interrupt(i),
                Cause::Exception(e) => self.interrupts.should_delegate_exception(e.code()),
            };

        trace!(
            "trap at pc {:#x}: {} (tval {:#x}), entering {}-mode",
            trap.pc,
            trap.cause,
            trap.tval,
            if delegated { "S" } else { "M" }
        );

        if delegated {
            self.trap_csrs
                .record_trap(false, trap.pc, trap.cause, trap.tval);
            self.status.set_spie(self.status.sie());
            self.status.set_spp(self.privilege.into());
            self.status.set_sie(false);
            self.pc = self.trap_csrs.stvec_target(trap.cause);
            self.privilege = PrivilegeLevel::Supervisor;
        } else {
            self.trap_csrs
                .record_trap(true, trap.pc, trap.cause, trap.tval);
            self.status.set_mpie(self.status.mie());
            self.status.set_mpp(self.privilege.into());
            self.status.set_mie(false);
            self.pc = self.trap_csrs.mtvec_target(trap.cause);
            self.privilege = PrivilegeLevel::Machine;
        }
    }

    /// Returns from an M-mode trap. The caller has already verified the executing privilege.
    pub(crate) fn do_mret(&mut self) {
        self.pc = self.trap_csrs.mepc();
        let previous = self.status.mpp();
        self.status.set_mie(self.status.mpie());
        self.status.set_mpie(true);
        self.status.set_mpp(RawPrivilegeLevel::User);
        if previous != PrivilegeLevel::Machine {
            self.status.set_mprv(false);
        }
        self.privilege = previous;
    }

    /// Returns from an S-mode trap.
    pub(crate) fn do_sret(&mut self) {
        self.pc = self.trap_csrs.sepc();
        let previous = self.status.spp();
        self.status.set_sie(self.status.spie());
        self.status.set_spie(true);
        self.status.set_spp(RawPrivilegeLevel::User);
        if previous != PrivilegeLevel::Machine {
            self.status.set_mprv(false);
        }
        self.privilege = previous;
    }

    /// Selects the highest-priority enabled pending interrupt, if any, and returns it as a trap
    /// to be taken before the next fetch.
    ///
    /// Priority order: MEI > MSI > MTI > SEI > SSI > STI. An M-level interrupt is globally
    /// enabled iff the privilege is below M, or `mstatus.MIE` is set in M-mode; an S-level
    /// (delegated) interrupt iff the privilege is below S, or `mstatus.SIE` is set in S-mode.
    pub fn check_interrupts(&self) -> Result<(), Trap> {
        let pending = self.hub.mip() & self.interrupts.mie();
        if pending == 0 {
            return Ok(());
        }

        let m_pending = pending & !self.interrupts.mideleg();
        let s_pending = pending & self.interrupts.mideleg();

        let m_enabled = self.privilege < PrivilegeLevel::Machine || self.status.mie();
        let s_enabled = self.privilege < PrivilegeLevel::Supervisor
            || (self.privilege == PrivilegeLevel::Supervisor && self.status.sie());

        for interrupt in interrupts::PRIORITY_ORDER {
            if m_enabled && m_pending & interrupt.mask() != 0 {
                return Err(Trap::new(self.pc, interrupt, 0));
            }
            if s_enabled && s_pending & interrupt.mask() != 0 {
                return Err(Trap::new(self.pc, interrupt, 0));
            }
        }
        Ok(())
    }

    /// Whether some pending interrupt is enabled in mie, regardless of the global enables.
    /// This is the wake-up condition of `wfi`.
    pub fn interrupt_would_wake(&self) -> bool {
        self.hub.mip() & self.interrupts.mie() != 0
    }

    fn check_csr_access(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    /// Gate for the floating-point CSRs and instructions: FS must not be Off.
    pub(crate) fn check_fs_on(&self) -> Result<(), CsrAccessError> {
        if self.status.fs() == ExtensionContextStatus::Off {
            return Err(CsrAccessError::FloatingPointOff);
        }
        Ok(())
    }

    /// Gate for the unprivileged counter CSRs (cycle, time, instret, hpmcounterN), indexed by
    /// their offset from `cycle`.
    fn check_counter_access(
        &self,
        index: u32,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        let allowed = match privilege_level {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => self.counters.s_mode_allows(index),
            PrivilegeLevel::User => self.counters.u_mode_allows(index),
        };
        if allowed {
            Ok(())
        } else {
            Err(CsrAccessError::CounterDisabled(index))
        }
    }

    /// Gate for stimecmp: requires `menvcfg.STCE`, and the TM counter-enable bit from S-mode.
    fn check_stimecmp_access(
        &self,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if privilege_level == PrivilegeLevel::Machine {
            return Ok(());
        }
        if !self.envcfg.stce() || !self.counters.s_mode_allows_time() {
            return Err(CsrAccessError::CounterDisabled(1));
        }
        Ok(())
    }

    /// Gate for satp and sfence.vma: illegal from S-mode when `mstatus.TVM` is set.
    pub(crate) fn check_tvm(&self, privilege_level: PrivilegeLevel) -> Result<(), CsrAccessError> {
        if privilege_level == PrivilegeLevel::Supervisor && self.status.tvm() {
            return Err(CsrAccessError::TrapVirtualMemory);
        }
        Ok(())
    }

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is performed. If the CSR that
    /// is being read requires a higher privilege level, a [`CsrAccessError::Privileged`] is
    /// given. Unimplemented specifiers give [`CsrAccessError::CsrUnsupported`]; all errors map
    /// to illegal-instruction at the execute layer.
    pub fn read_csr(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, CsrAccessError> {
        self.check_csr_access(specifier, privilege_level)?;
        match specifier {
            //
            // Unprivileged floating-point CSRs
            //
            csr::FFLAGS => {
                self.check_fs_on()?;
                Ok(self.fcsr.fflags())
            }
            csr::FRM => {
                self.check_fs_on()?;
                Ok(self.fcsr.frm())
            }
            csr::FCSR => {
                self.check_fs_on()?;
                Ok(self.fcsr.fcsr())
            }
            //
            // Unprivileged counters
            //
            csr::CYCLE => {
                self.check_counter_access(0, privilege_level)?;
                Ok(self.counters.mcycle())
            }
            csr::TIME => {
                self.check_counter_access(1, privilege_level)?;
                Ok(self.hub.time())
            }
            csr::INSTRET => {
                self.check_counter_access(2, privilege_level)?;
                Ok(self.counters.minstret())
            }
            csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => {
                self.check_counter_access((specifier - csr::CYCLE) as u32, privilege_level)?;
                Ok(0)
            }
            //
            // Supervisor CSRs
            //
            csr::SSTATUS => Ok(self.status.sstatus()),
            csr::SIE => Ok(self.interrupts.sie()),
            csr::STVEC => Ok(self.trap_csrs.stvec()),
            csr::SCOUNTEREN => Ok(self.counters.scounteren()),
            csr::SENVCFG => Ok(self.envcfg.senvcfg()),
            csr::SSCRATCH => Ok(self.trap_csrs.sscratch()),
            csr::SEPC => Ok(self.trap_csrs.sepc()),
            csr::SCAUSE => Ok(self.trap_csrs.scause()),
            csr::STVAL => Ok(self.trap_csrs.stval()),
            csr::SIP => Ok(self.hub.mip() & self.interrupts.mideleg()),
            csr::STIMECMP => {
                self.check_stimecmp_access(privilege_level)?;
                Ok(self.hub.stimecmp())
            }
            csr::SATP => {
                self.check_tvm(privilege_level)?;
                Ok(self.satp.raw())
            }
            //
            // Machine info registers
            //
            csr::MVENDORID => Ok(Self::MVENDORID),
            csr::MARCHID => Ok(Self::MARCHID),
            csr::MIMPID => Ok(Self::MIMPID),
            csr::MHARTID => Ok(self.config.hart_id),
            csr::MCONFIGPTR => Ok(0),
            //
            // Machine trap setup / handling
            //
            csr::MSTATUS => Ok(self.status.mstatus()),
            csr::MISA => Ok(Self::MISA),
            csr::MEDELEG => Ok(self.interrupts.medeleg()),
            csr::MIDELEG => Ok(self.interrupts.mideleg()),
            csr::MIE => Ok(self.interrupts.mie()),
            csr::MTVEC => Ok(self.trap_csrs.mtvec()),
            csr::MCOUNTEREN => Ok(self.counters.mcounteren()),
            csr::MENVCFG => Ok(self.envcfg.menvcfg()),
            csr::MCOUNTINHIBIT => Ok(self.counters.mcountinhibit()),
            csr::MSCRATCH => Ok(self.trap_csrs.mscratch()),
            csr::MEPC => Ok(self.trap_csrs.mepc()),
            csr::MCAUSE => Ok(self.trap_csrs.mcause()),
            csr::MTVAL => Ok(self.trap_csrs.mtval()),
            csr::MIP => Ok(self.hub.mip()),
            //
            // Machine memory protection (PMP is not enforced; the registers exist)
            //
            csr::PMPCFG0..=csr::PMPCFG15 => {
                // Only the even-numbered configuration registers exist on RV64.
                if (specifier - csr::PMPCFG0) % 2 == 0 {
                    Ok(0)
                } else {
                    Err(CsrAccessError::CsrUnsupported(specifier))
                }
            }
            csr::PMPADDR0..=csr::PMPADDR63 => {
                Ok(self.pmpaddr[(specifier - csr::PMPADDR0) as usize])
            }
            //
            // Machine counters
            //
            csr::MCYCLE => Ok(self.counters.mcycle()),
            csr::MINSTRET => Ok(self.counters.minstret()),
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => Ok(0),
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => Ok(0),
            //
            // Debug/trace stubs
            //
            csr::TSELECT => Ok(0),
            csr::TDATA1..=csr::TDATA3 => Ok(0),
            _ => Err(CsrAccessError::CsrUnsupported(specifier)),
        }
    }

    /// Write a CSR through the checked path.
    ///
    /// `mask` selects the bits to be written, implementing the set/clear forms.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: u64,
        mask: u64,
    ) -> Result<(), CsrWriteError> {
        self.check_csr_access(specifier, privilege_level)
            .map_err(CsrWriteError::AccessError)?;
        if csr::is_read_only(specifier) {
            return Err(CsrWriteError::WriteToReadOnly);
        }
        match specifier {
            csr::FFLAGS => {
                self.check_fs_on().map_err(CsrWriteError::AccessError)?;
                self.fcsr.write_fflags(value, mask);
                self.set_fs_dirty();
            }
            csr::FRM => {
                self.check_fs_on().map_err(CsrWriteError::AccessError)?;
                self.fcsr.write_frm(value, mask);
                self.set_fs_dirty();
            }
            csr::FCSR => {
                self.check_fs_on().map_err(CsrWriteError::AccessError)?;
                self.fcsr.write_fcsr(value, mask);
                self.set_fs_dirty();
            }
            csr::SSTATUS => self.status.write_sstatus(value, mask),
            csr::SIE => self.interrupts.write_sie(value, mask),
            csr::STVEC => self.trap_csrs.write_stvec(value, mask),
            csr::SCOUNTEREN => self.counters.write_scounteren(value, mask),
            csr::SENVCFG => self.envcfg.write_senvcfg(value, mask),
            csr::SSCRATCH => self.trap_csrs.write_sscratch(value, mask),
            csr::SEPC => self.trap_csrs.write_sepc(value, mask),
            csr::SCAUSE => self.trap_csrs.write_scause(value, mask),
            csr::STVAL => self.trap_csrs.write_stval(value, mask),
            // Only SSIP is software-writable through the sip shadow.
            csr::SIP => self.hub.write_mip_software(value, mask & interrupts::SSIP),
            csr::STIMECMP => {
                self.check_stimecmp_access(privilege_level)
                    .map_err(CsrWriteError::AccessError)?;
                let updated = self.hub.stimecmp() & !mask | value & mask;
                self.hub.set_stimecmp(updated);
            }
            csr::SATP => {
                self.check_tvm(privilege_level)
                    .map_err(CsrWriteError::AccessError)?;
                // A successful mode change would flush a translation cache; this
                // implementation walks the tables on every access, so there is none.
                self.satp.write(value, mask);
            }
            csr::MSTATUS => self.status.write_mstatus(value, mask),
            // The machine info registers and misa are WARL no-ops.
            csr::MISA => {}
            csr::MEDELEG => self.interrupts.write_medeleg(value, mask),
            csr::MIDELEG => self.interrupts.write_mideleg(value, mask),
            csr::MIE => self.interrupts.write_mie(value, mask),
            csr::MTVEC => self.trap_csrs.write_mtvec(value, mask),
            csr::MCOUNTEREN => self.counters.write_mcounteren(value, mask),
            csr::MENVCFG => {
                self.envcfg.write_menvcfg(value, mask);
                self.hub.set_stce(self.envcfg.stce());
            }
            csr::MCOUNTINHIBIT => self.counters.write_mcountinhibit(value, mask),
            csr::MSCRATCH => self.trap_csrs.write_mscratch(value, mask),
            csr::MEPC => self.trap_csrs.write_mepc(value, mask),
            csr::MCAUSE => self.trap_csrs.write_mcause(value, mask),
            csr::MTVAL => self.trap_csrs.write_mtval(value, mask),
            csr::MIP => self.hub.write_mip_software(value, mask),
            csr::PMPCFG0..=csr::PMPCFG15 => {
                if (specifier - csr::PMPCFG0) % 2 != 0 {
                    return Err(CsrWriteError::AccessError(CsrAccessError::CsrUnsupported(
                        specifier,
                    )));
                }
                // PMP configuration is hardwired to zero.
            }
            csr::PMPADDR0..=csr::PMPADDR63 => {
                let reg = &mut self.pmpaddr[(specifier - csr::PMPADDR0) as usize];
                *reg = *reg & !mask | value & mask;
            }
            csr::MCYCLE => self.counters.write_mcycle(value, mask),
            csr::MINSTRET => self.counters.write_minstret(value, mask),
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {}
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {}
            csr::TSELECT => {}
            csr::TDATA1..=csr::TDATA3 => {}
            _ => {
                return Err(CsrWriteError::AccessError(CsrAccessError::CsrUnsupported(
                    specifier,
                )))
            }
        }
        Ok(())
    }
}

/// Errors that can occur when attempting to access a CSR.
#[derive(thiserror::Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
             since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: RawPrivilegeLevel,
        /// The actual privilege level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
    /// Attempt to access a floating-point CSR while `mstatus.FS` is Off.
    #[error("floating-point unit is off")]
    FloatingPointOff,
    /// Attempt to read a counter that the counter-enable registers hide from this mode.
    #[error("counter {0} disabled for this privilege level")]
    CounterDisabled(u32),
    /// Attempt to access satp (or execute sfence.vma) from S-mode with `mstatus.TVM` set.
    #[error("virtual-memory management trapped by mstatus.TVM")]
    TrapVirtualMemory,
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(thiserror::Error, Debug)]
pub enum CsrWriteError {
    /// A non-write specific access error. See [`CsrAccessError`].
    #[error("{0}")]
    AccessError(CsrAccessError),
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR is invalid")]
    WriteToReadOnly,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trap::{Exception, Interrupt};

    fn hart() -> Hart {
        Hart::new(Arc::new(IrqHub::new()), Config::default())
    }

    #[test]
    fn test_csr_privilege_gate() {
        let hart = hart();
        for level in [PrivilegeLevel::User, PrivilegeLevel::Supervisor] {
            assert!(matches!(
                hart.read_csr(csr::MSTATUS, level),
                Err(CsrAccessError::Privileged { .. })
            ));
        }
        assert!(hart.read_csr(csr::MSTATUS, PrivilegeLevel::Machine).is_ok());
        // S-level CSRs are accessible from M and S, not U.
        assert!(hart
            .read_csr(csr::SSCRATCH, PrivilegeLevel::Supervisor)
            .is_ok());
        assert!(matches!(
            hart.read_csr(csr::SSCRATCH, PrivilegeLevel::User),
            Err(CsrAccessError::Privileged { .. })
        ));
    }

    #[test]
    fn test_unimplemented_csr() {
        let mut hart = hart();
        assert!(matches!(
            hart.read_csr(0x5C0, PrivilegeLevel::Machine),
            Err(CsrAccessError::CsrUnsupported(_))
        ));
        assert!(hart
            .write_csr(0x5C0, PrivilegeLevel::Machine, 0, u64::MAX)
            .is_err());
    }

    #[test]
    fn test_read_only_csr_write() {
        let mut hart = hart();
        // Hardwired but writable address: the write is a no-op.
        assert!(hart
            .write_csr(csr::MISA, PrivilegeLevel::Machine, 0, u64::MAX)
            .is_ok());
        assert_eq!(
            Hart::MISA,
            hart.read_csr(csr::MISA, PrivilegeLevel::Machine).unwrap()
        );
        // Read-only address: the write traps.
        assert!(matches!(
            hart.write_csr(csr::MVENDORID, PrivilegeLevel::Machine, 0, u64::MAX),
            Err(CsrWriteError::WriteToReadOnly)
        ));
    }

    #[test]
    fn test_counter_gating() {
        let mut hart = hart();
        assert!(hart.read_csr(csr::CYCLE, PrivilegeLevel::Machine).is_ok());
        assert!(matches!(
            hart.read_csr(csr::CYCLE, PrivilegeLevel::Supervisor),
            Err(CsrAccessError::CounterDisabled(0))
        ));
        hart.write_csr(csr::MCOUNTEREN, PrivilegeLevel::Machine, 1, u64::MAX)
            .unwrap();
        assert!(hart
            .read_csr(csr::CYCLE, PrivilegeLevel::Supervisor)
            .is_ok());
        // U-mode additionally requires scounteren.
        assert!(hart.read_csr(csr::CYCLE, PrivilegeLevel::User).is_err());
        hart.write_csr(csr::SCOUNTEREN, PrivilegeLevel::Machine, 1, u64::MAX)
            .unwrap();
        assert!(hart.read_csr(csr::CYCLE, PrivilegeLevel::User).is_ok());
    }

    #[test]
    fn test_trap_enters_machine_mode_by_default() {
        let mut hart = hart();
        hart.write_csr(csr::MTVEC, PrivilegeLevel::Machine, 0x8000_1000, u64::MAX)
            .unwrap();
        hart.status_mut().set_mie(true);

        hart.handle_trap(Trap::new(
            0x8000_0004,
            Exception::IllegalInstruction,
            0xDEAD,
        ));

        assert_eq!(0x8000_1000, hart.pc());
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
        assert_eq!(
            0x8000_0004,
            hart.read_csr(csr::MEPC, PrivilegeLevel::Machine).unwrap()
        );
        assert_eq!(
            2,
            hart.read_csr(csr::MCAUSE, PrivilegeLevel::Machine).unwrap()
        );
        assert_eq!(
            0xDEAD,
            hart.read_csr(csr::MTVAL, PrivilegeLevel::Machine).unwrap()
        );
        // MIE was stacked into MPIE and cleared.
        assert!(!hart.status().mie());
        assert!(hart.status().mpie());
    }

    #[test]
    fn test_trap_delegation_to_supervisor() {
        let mut hart = hart();
        hart.write_csr(csr::STVEC, PrivilegeLevel::Machine, 0x8000_2000, u64::MAX)
            .unwrap();
        // Delegate ECALL-from-U.
        hart.write_csr(csr::MEDELEG, PrivilegeLevel::Machine, 1 << 8, u64::MAX)
            .unwrap();
        hart.privilege = PrivilegeLevel::User;

        hart.handle_trap(Trap::new(0x10, Exception::EnvironmentCallFromUMode, 0));

        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        assert_eq!(0x8000_2000, hart.pc());
        assert_eq!(
            8,
            hart.read_csr(csr::SCAUSE, PrivilegeLevel::Machine).unwrap()
        );
        assert_eq!(PrivilegeLevel::User, hart.status().spp());

        // The same trap from M-mode ignores the delegation.
        hart.privilege = PrivilegeLevel::Machine;
        hart.handle_trap(Trap::new(0x20, Exception::EnvironmentCallFromUMode, 0));
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
    }

    #[test]
    fn test_vectored_interrupt_entry() {
        let mut hart = hart();
        hart.write_csr(
            csr::MTVEC,
            PrivilegeLevel::Machine,
            0x8000_1000 | 1,
            u64::MAX,
        )
        .unwrap();
        hart.handle_trap(Trap::new(0x0, Interrupt::MachineTimerInterrupt, 0));
        assert_eq!(0x8000_1000 + 4 * 7, hart.pc());

        // Exceptions ignore the vectoring.
        hart.handle_trap(Trap::new(0x0, Exception::Breakpoint, 0));
        assert_eq!(0x8000_1000, hart.pc());
    }

    #[test]
    fn test_interrupt_priority_order() {
        let mut hart = hart();
        hart.write_csr(
            csr::MIE,
            PrivilegeLevel::Machine,
            u64::MAX,
            u64::MAX,
        )
        .unwrap();
        hart.status_mut().set_mie(true);

        hart.hub()
            .set_interrupt_pending(interrupts::MTIP | interrupts::MEIP, true);
        let trap = hart.check_interrupts().unwrap_err();
        assert_eq!(
            Cause::Interrupt(Interrupt::MachineExternalInterrupt),
            trap.cause
        );

        hart.hub().set_interrupt_pending(interrupts::MEIP, false);
        let trap = hart.check_interrupts().unwrap_err();
        assert_eq!(
            Cause::Interrupt(Interrupt::MachineTimerInterrupt),
            trap.cause
        );
    }

    #[test]
    fn test_interrupts_masked_in_machine_mode_without_mie() {
        let mut hart = hart();
        hart.write_csr(csr::MIE, PrivilegeLevel::Machine, u64::MAX, u64::MAX)
            .unwrap();
        hart.hub().set_interrupt_pending(interrupts::MTIP, true);

        assert!(hart.check_interrupts().is_ok());
        hart.status_mut().set_mie(true);
        assert!(hart.check_interrupts().is_err());

        // A lower privilege level takes M-level interrupts regardless of MIE.
        hart.status_mut().set_mie(false);
        hart.privilege = PrivilegeLevel::Supervisor;
        assert!(hart.check_interrupts().is_err());
    }

    #[test]
    fn test_mret_restores_privilege() {
        let mut hart = hart();
        hart.write_csr(csr::MEPC, PrivilegeLevel::Machine, 0x8000_0042, u64::MAX)
            .unwrap();
        hart.status_mut().set_mpp(RawPrivilegeLevel::User);
        hart.status_mut().set_mpie(true);
        hart.status_mut().set_mprv(true);

        hart.do_mret();

        assert_eq!(PrivilegeLevel::User, hart.privilege());
        assert_eq!(0x8000_0042, hart.pc());
        assert!(hart.status().mie());
        assert!(hart.status().mpie());
        assert_eq!(PrivilegeLevel::User, hart.status().mpp());
        // MPRV is cleared when returning to a less-privileged mode.
        assert!(!hart.status().mprv());
    }

    #[test]
    fn test_satp_tvm_gate() {
        let mut hart = hart();
        hart.privilege = PrivilegeLevel::Supervisor;
        assert!(hart.read_csr(csr::SATP, PrivilegeLevel::Supervisor).is_ok());
        hart.status_mut().set_tvm(true);
        assert!(matches!(
            hart.read_csr(csr::SATP, PrivilegeLevel::Supervisor),
            Err(CsrAccessError::TrapVirtualMemory)
        ));
    }
}
