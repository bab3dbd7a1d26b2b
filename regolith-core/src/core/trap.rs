//! Trap values: exceptions, interrupts, and the `(pc, cause, tval)` triple that propagates out of
//! instruction execution.

use std::fmt;

/// Bit 63 of a cause register distinguishes interrupts from exceptions.
pub const INTERRUPT_BIT: u64 = 1 << 63;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not aligned to the fetch granule.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Privileged instruction gating (TSR/TVM/TW, rounding-mode, FS=Off).
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::InstructionAddressMisaligned,
            1 => Self::InstructionAccessFault,
            2 => Self::IllegalInstruction,
            3 => Self::Breakpoint,
            4 => Self::LoadAddressMisaligned,
            5 => Self::LoadAccessFault,
            6 => Self::StoreOrAmoAddressMisaligned,
            7 => Self::StoreOrAmoAccessFault,
            8 => Self::EnvironmentCallFromUMode,
            9 => Self::EnvironmentCallFromSMode,
            11 => Self::EnvironmentCallFromMMode,
            12 => Self::InstructionPageFault,
            13 => Self::LoadPageFault,
            15 => Self::StoreOrAmoPageFault,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt, without the interrupt bit.
    pub fn code(&self) -> u64 {
        match self {
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::SupervisorSoftwareInterrupt,
            3 => Self::MachineSoftwareInterrupt,
            5 => Self::SupervisorTimerInterrupt,
            7 => Self::MachineTimerInterrupt,
            9 => Self::SupervisorExternalInterrupt,
            11 => Self::MachineExternalInterrupt,
            _ => return None,
        })
    }

    /// The corresponding bit position in the mip/mie registers.
    pub fn mask(&self) -> u64 {
        1 << self.code()
    }
}

/// The cause of a trap: an exception or an interrupt, as written to `mcause`/`scause`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Cause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Cause {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    /// The low cause code, without the interrupt bit.
    pub fn code(&self) -> u64 {
        match self {
            Self::Exception(e) => e.code(),
            Self::Interrupt(i) => i.code(),
        }
    }

    /// The full cause register value, with the interrupt bit in the MSB.
    pub fn to_bits(self) -> u64 {
        match self {
            Self::Exception(e) => e.code(),
            Self::Interrupt(i) => i.code() | INTERRUPT_BIT,
        }
    }

    pub fn from_bits(bits: u64) -> Option<Self> {
        if bits & INTERRUPT_BIT != 0 {
            Interrupt::from_code(bits & !INTERRUPT_BIT).map(Self::Interrupt)
        } else {
            Exception::from_code(bits).map(Self::Exception)
        }
    }
}

impl From<Exception> for Cause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for Cause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(e) => write!(f, "exception {:?}", e),
            Self::Interrupt(i) => write!(f, "interrupt {:?}", i),
        }
    }
}

/// A trap raised during instruction fetch or execution.
///
/// `pc` is the address of the instruction that trapped (for interrupts: the next instruction to
/// retire), `tval` the exception-specific value written to `mtval`/`stval`. Traps propagate as
/// the `Err` arm out of instruction execution and are consumed by the hart's trap handler; they
/// are never retained across instructions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Trap {
    pub pc: u64,
    pub cause: Cause,
    pub tval: u64,
}

impl Trap {
    pub fn new(pc: u64, cause: impl Into<Cause>, tval: u64) -> Self {
        Self {
            pc,
            cause: cause.into(),
            tval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_bits_round_trip() {
        let e = Cause::Exception(Exception::StoreOrAmoPageFault);
        assert_eq!(15, e.to_bits());
        assert_eq!(Some(e), Cause::from_bits(15));

        let i = Cause::Interrupt(Interrupt::MachineTimerInterrupt);
        assert_eq!(7 | INTERRUPT_BIT, i.to_bits());
        assert_eq!(Some(i), Cause::from_bits(7 | INTERRUPT_BIT));

        assert_eq!(None, Cause::from_bits(10));
        assert_eq!(None, Cause::from_bits(2 | INTERRUPT_BIT));
    }
}
