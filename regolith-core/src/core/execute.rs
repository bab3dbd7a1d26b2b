//! One execute function per operation.
//!
//! Handlers read the decoded operand fields, touch registers and CSRs through the hart, touch
//! memory through the MMU, and may redirect the PC. They run after the PC has already been
//! advanced past the instruction, so a fall-through handler leaves the PC alone and a
//! jump/branch overwrites it. Any fault unwinds as a [`Trap`] without leaving partial state
//! behind.
//!
//! The compressed instructions place their operands into the same fields at decode time and
//! share the base handlers; only the expansion is different, never the semantics.

use std::time::Duration;

use rustc_apfloat::ieee::{Double, Single};
use rustc_apfloat::{Float, FloatConvert, Round, StatusAnd};

use crate::bits::sext;
use crate::core::float::{
    self, fclass, fmax, fmin, nan_to_positive, resolve_rounding_mode, status_to_fflags, FloatExt,
};
use crate::core::trap::{Exception, Trap};
use crate::core::{Hart, Mmu};
use crate::instruction::{DecodedInsn, Opcode};
use crate::registers::Specifier;
use crate::PrivilegeLevel;

/// Result of executing a single instruction. [`Ok`] if execution retired normally, [`Err`] if a
/// trap must be taken.
pub type ExecResult = Result<(), Trap>;

/// The signature shared by every execute function.
pub type ExecFn = fn(&mut Hart, &mut Mmu, &DecodedInsn) -> ExecResult;

fn illegal(d: &DecodedInsn) -> Trap {
    Trap::new(d.pc, Exception::IllegalInstruction, d.insn as u64)
}

fn sext32(x: u32) -> u64 {
    x as i32 as i64 as u64
}

// Common instruction shapes.

fn reg_reg(hart: &mut Hart, d: &DecodedInsn, op: impl FnOnce(u64, u64) -> u64) -> ExecResult {
    let result = op(hart.x(d.rs1), hart.x(d.rs2));
    hart.set_x(d.rd, result);
    Ok(())
}

fn reg_imm(hart: &mut Hart, d: &DecodedInsn, op: impl FnOnce(u64, u64) -> u64) -> ExecResult {
    let result = op(hart.x(d.rs1), d.imm);
    hart.set_x(d.rd, result);
    Ok(())
}

/// Redirects the PC, checking target alignment for the 16-bit fetch granule.
fn jump_to(hart: &mut Hart, d: &DecodedInsn, target: u64) -> ExecResult {
    if target & 1 != 0 {
        return Err(Trap::new(
            d.pc,
            Exception::InstructionAddressMisaligned,
            target,
        ));
    }
    hart.set_pc(target);
    Ok(())
}

fn branch(hart: &mut Hart, d: &DecodedInsn, taken: bool) -> ExecResult {
    if taken {
        jump_to(hart, d, d.pc.wrapping_add(d.imm))
    } else {
        Ok(())
    }
}

//
// RV64I
//

fn add(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a.wrapping_add(b))
}

fn addi(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| a.wrapping_add(imm))
}

fn addiw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| sext32(a.wrapping_add(imm) as u32))
}

fn addw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32(a.wrapping_add(b) as u32))
}

fn and(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a & b)
}

fn andi(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| a & imm)
}

fn auipc(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    hart.set_x(d.rd, d.pc.wrapping_add(d.imm));
    Ok(())
}

fn beq(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = hart.x(d.rs1) == hart.x(d.rs2);
    branch(hart, d, taken)
}

fn bge(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = hart.x(d.rs1) as i64 >= hart.x(d.rs2) as i64;
    branch(hart, d, taken)
}

fn bgeu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = hart.x(d.rs1) >= hart.x(d.rs2);
    branch(hart, d, taken)
}

fn blt(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = (hart.x(d.rs1) as i64) < hart.x(d.rs2) as i64;
    branch(hart, d, taken)
}

fn bltu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = hart.x(d.rs1) < hart.x(d.rs2);
    branch(hart, d, taken)
}

fn bne(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let taken = hart.x(d.rs1) != hart.x(d.rs2);
    branch(hart, d, taken)
}

fn fence(_: &mut Hart, _: &mut Mmu, _: &DecodedInsn) -> ExecResult {
    // A single in-order hart needs no memory ordering.
    Ok(())
}

fn fence_i(_: &mut Hart, _: &mut Mmu, _: &DecodedInsn) -> ExecResult {
    // Instructions are always fetched from the coherent bus; nothing to synchronize.
    Ok(())
}

fn jal(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let link = d.pc.wrapping_add(d.len.size());
    jump_to(hart, d, d.pc.wrapping_add(d.imm))?;
    hart.set_x(d.rd, link);
    Ok(())
}

fn jalr(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let link = d.pc.wrapping_add(d.len.size());
    let target = hart.x(d.rs1).wrapping_add(d.imm) & !1;
    jump_to(hart, d, target)?;
    hart.set_x(d.rd, link);
    Ok(())
}

fn lb(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u8(hart, d.pc, addr)?;
    hart.set_x(d.rd, sext(v as u64, 8));
    Ok(())
}

fn lbu(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u8(hart, d.pc, addr)?;
    hart.set_x(d.rd, v as u64);
    Ok(())
}

fn lh(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u16(hart, d.pc, addr)?;
    hart.set_x(d.rd, sext(v as u64, 16));
    Ok(())
}

fn lhu(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u16(hart, d.pc, addr)?;
    hart.set_x(d.rd, v as u64);
    Ok(())
}

fn lw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u32(hart, d.pc, addr)?;
    hart.set_x(d.rd, sext32(v));
    Ok(())
}

fn lwu(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u32(hart, d.pc, addr)?;
    hart.set_x(d.rd, v as u64);
    Ok(())
}

fn ld(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u64(hart, d.pc, addr)?;
    hart.set_x(d.rd, v);
    Ok(())
}

fn lui(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    hart.set_x(d.rd, d.imm);
    Ok(())
}

fn or(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a | b)
}

fn ori(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| a | imm)
}

fn sb(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u8(hart, d.pc, addr, hart.x(d.rs2) as u8)
}

fn sh(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u16(hart, d.pc, addr, hart.x(d.rs2) as u16)
}

fn sw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u32(hart, d.pc, addr, hart.x(d.rs2) as u32)
}

fn sd(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u64(hart, d.pc, addr, hart.x(d.rs2))
}

fn sll(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a << (b & 0x3F))
}

fn slli(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| a << shamt)
}

fn slliw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| sext32((a as u32) << shamt))
}

fn sllw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32((a as u32) << (b & 0x1F)))
}

fn slt(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| ((a as i64) < b as i64) as u64)
}

fn slti(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| ((a as i64) < imm as i64) as u64)
}

fn sltiu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| (a < imm) as u64)
}

fn sltu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| (a < b) as u64)
}

fn sra(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| ((a as i64) >> (b & 0x3F)) as u64)
}

fn srai(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| ((a as i64) >> shamt) as u64)
}

fn sraiw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| {
        sext32(((a as u32 as i32) >> shamt) as u32)
    })
}

fn sraw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32(((a as u32 as i32) >> (b & 0x1F)) as u32))
}

fn srl(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a >> (b & 0x3F))
}

fn srli(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| a >> shamt)
}

fn srliw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, shamt| sext32((a as u32) >> shamt))
}

fn srlw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32((a as u32) >> (b & 0x1F)))
}

fn sub(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a.wrapping_sub(b))
}

fn subw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32(a.wrapping_sub(b) as u32))
}

fn xor(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a ^ b)
}

fn xori(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_imm(hart, d, |a, imm| a ^ imm)
}

//
// Zicsr
//

#[derive(Copy, Clone, Eq, PartialEq)]
enum CsrOp {
    ReadWrite,
    ReadSet,
    ReadClear,
}

/// The common CSR access sequence.
///
/// > If rd=x0, then the instruction shall not read the CSR and shall not cause any of the side
/// > effects that might occur on a CSR read. [CSRRW only]
///
/// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR at all.
///
/// The read and the write are performed at the same, original privilege level, and the
/// destination register is only written once both halves have succeeded.
fn csr_op(hart: &mut Hart, d: &DecodedInsn, op: CsrOp, src: Option<u64>) -> ExecResult {
    let privilege = hart.privilege();
    let specifier = d.csr();

    let read_required = op != CsrOp::ReadWrite || d.rd != Specifier::X0;
    let old_value = if read_required {
        Some(
            hart.read_csr(specifier, privilege)
                .map_err(|_| illegal(d))?,
        )
    } else {
        None
    };

    if let Some(src) = src {
        let (value, mask) = match op {
            CsrOp::ReadWrite => (src, u64::MAX),
            CsrOp::ReadSet => (u64::MAX, src),
            CsrOp::ReadClear => (0, src),
        };
        hart.write_csr(specifier, privilege, value, mask)
            .map_err(|_| illegal(d))?;
    }

    if let Some(old_value) = old_value {
        hart.set_x(d.rd, old_value);
    }
    Ok(())
}

fn csrrw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let src = hart.x(d.rs1);
    csr_op(hart, d, CsrOp::ReadWrite, Some(src))
}

fn csrrs(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let src = (d.rs1 != Specifier::X0).then(|| hart.x(d.rs1));
    csr_op(hart, d, CsrOp::ReadSet, src)
}

fn csrrc(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let src = (d.rs1 != Specifier::X0).then(|| hart.x(d.rs1));
    csr_op(hart, d, CsrOp::ReadClear, src)
}

fn csrrwi(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    csr_op(hart, d, CsrOp::ReadWrite, Some(d.zimm()))
}

fn csrrsi(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let src = (d.zimm() != 0).then(|| d.zimm());
    csr_op(hart, d, CsrOp::ReadSet, src)
}

fn csrrci(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let src = (d.zimm() != 0).then(|| d.zimm());
    csr_op(hart, d, CsrOp::ReadClear, src)
}

//
// Privileged
//

fn ecall(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let cause = match hart.privilege() {
        PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
        PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
        PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
    };
    Err(Trap::new(d.pc, cause, 0))
}

fn ebreak(_: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    Err(Trap::new(d.pc, Exception::Breakpoint, d.pc))
}

fn mret(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    if hart.privilege() != PrivilegeLevel::Machine {
        return Err(illegal(d));
    }
    hart.do_mret();
    Ok(())
}

fn sret(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    match hart.privilege() {
        PrivilegeLevel::User => return Err(illegal(d)),
        PrivilegeLevel::Supervisor if hart.status().tsr() => return Err(illegal(d)),
        _ => {}
    }
    hart.do_sret();
    Ok(())
}

fn wfi(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    match hart.privilege() {
        PrivilegeLevel::User => return Err(illegal(d)),
        PrivilegeLevel::Supervisor if hart.status().tw() => return Err(illegal(d)),
        _ => {}
    }
    // Wait until some enabled interrupt is pending (the global enables are ignored here; the
    // interrupt is then taken, or not, before the next fetch) or the engine shuts down. The
    // controller thread keeps ticking devices meanwhile.
    while !hart.interrupt_would_wake() && !hart.hub().wakeup_requested() {
        std::thread::sleep(Duration::from_micros(50));
    }
    Ok(())
}

fn sfence_vma(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    if hart.privilege() == PrivilegeLevel::User {
        return Err(illegal(d));
    }
    hart.check_tvm(hart.privilege()).map_err(|_| illegal(d))?;
    // Translation is walked on every access; there is no TLB to invalidate.
    Ok(())
}

//
// RV64M
//

fn mul(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| a.wrapping_mul(b))
}

fn mulh(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        ((a as i64 as i128).wrapping_mul(b as i64 as i128) >> 64) as u64
    })
}

fn mulhsu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        ((a as i64 as i128).wrapping_mul(b as u128 as i128) >> 64) as u64
    })
}

fn mulhu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| ((a as u128 * b as u128) >> 64) as u64)
}

fn mulw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| sext32(a.wrapping_mul(b) as u32))
}

/// > The quotient of division by zero has all bits set, and the remainder of division by zero
/// > equals the dividend. Signed division overflow ... the quotient [is] equal to the dividend,
/// > and the remainder zero.
fn div(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as i64, b as i64);
        if b == 0 {
            u64::MAX
        } else if a == i64::MIN && b == -1 {
            a as u64
        } else {
            (a / b) as u64
        }
    })
}

fn divu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| if b == 0 { u64::MAX } else { a / b })
}

fn divw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as u32 as i32, b as u32 as i32);
        if b == 0 {
            u64::MAX
        } else if a == i32::MIN && b == -1 {
            sext32(a as u32)
        } else {
            sext32((a / b) as u32)
        }
    })
}

fn divuw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as u32, b as u32);
        if b == 0 {
            u64::MAX
        } else {
            sext32(a / b)
        }
    })
}

fn rem(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as i64, b as i64);
        if b == 0 {
            a as u64
        } else if a == i64::MIN && b == -1 {
            0
        } else {
            (a % b) as u64
        }
    })
}

fn remu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| if b == 0 { a } else { a % b })
}

fn remw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as u32 as i32, b as u32 as i32);
        if b == 0 {
            sext32(a as u32)
        } else if a == i32::MIN && b == -1 {
            0
        } else {
            sext32((a % b) as u32)
        }
    })
}

fn remuw(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    reg_reg(hart, d, |a, b| {
        let (a, b) = (a as u32, b as u32);
        if b == 0 {
            sext32(a)
        } else {
            sext32(a % b)
        }
    })
}

//
// RV64A
//

fn lr_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1);
    let v = mmu.load_reserved_u32(hart, d.pc, addr)?;
    hart.set_x(d.rd, sext32(v));
    Ok(())
}

fn lr_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1);
    let v = mmu.load_reserved_u64(hart, d.pc, addr)?;
    hart.set_x(d.rd, v);
    Ok(())
}

fn sc_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1);
    let outcome = mmu.store_conditional_u32(hart, d.pc, addr, hart.x(d.rs2) as u32)?;
    hart.set_x(d.rd, outcome);
    Ok(())
}

fn sc_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    let addr = hart.x(d.rs1);
    let outcome = mmu.store_conditional_u64(hart, d.pc, addr, hart.x(d.rs2))?;
    hart.set_x(d.rd, outcome);
    Ok(())
}

fn amo_w(
    hart: &mut Hart,
    mmu: &mut Mmu,
    d: &DecodedInsn,
    op: impl FnOnce(u32, u32) -> u32,
) -> ExecResult {
    let addr = hart.x(d.rs1);
    let src = hart.x(d.rs2) as u32;
    let old = mmu.amo_u32(hart, d.pc, addr, |v| op(v, src))?;
    hart.set_x(d.rd, sext32(old));
    Ok(())
}

fn amo_d(
    hart: &mut Hart,
    mmu: &mut Mmu,
    d: &DecodedInsn,
    op: impl FnOnce(u64, u64) -> u64,
) -> ExecResult {
    let addr = hart.x(d.rs1);
    let src = hart.x(d.rs2);
    let old = mmu.amo_u64(hart, d.pc, addr, |v| op(v, src))?;
    hart.set_x(d.rd, old);
    Ok(())
}

fn amoswap_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |_, b| b)
}

fn amoswap_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |_, b| b)
}

fn amoadd_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| a.wrapping_add(b))
}

fn amoadd_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| a.wrapping_add(b))
}

fn amoxor_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| a ^ b)
}

fn amoxor_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| a ^ b)
}

fn amoand_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| a & b)
}

fn amoand_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| a & b)
}

fn amoor_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| a | b)
}

fn amoor_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| a | b)
}

fn amomin_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| (a as i32).min(b as i32) as u32)
}

fn amomin_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| (a as i64).min(b as i64) as u64)
}

fn amomax_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, |a, b| (a as i32).max(b as i32) as u32)
}

fn amomax_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, |a, b| (a as i64).max(b as i64) as u64)
}

fn amominu_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, u32::min)
}

fn amominu_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, u64::min)
}

fn amomaxu_w(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_w(hart, mmu, d, u32::max)
}

fn amomaxu_d(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    amo_d(hart, mmu, d, u64::max)
}

//
// RV64F / RV64D common plumbing
//

fn check_fs(hart: &Hart, d: &DecodedInsn) -> Result<(), Trap> {
    hart.check_fs_on().map_err(|_| illegal(d))
}

fn rounding(hart: &Hart, d: &DecodedInsn) -> Result<Round, Trap> {
    resolve_rounding_mode(d.rm(), hart.fcsr().frm()).ok_or_else(|| illegal(d))
}

fn read_single(hart: &Hart, s: Specifier) -> Single {
    Single::from_bits(hart.fregisters().f_single(s) as u128)
}

fn read_double(hart: &Hart, s: Specifier) -> Double {
    Double::from_bits(hart.fregisters().f(s) as u128)
}

fn write_single(hart: &mut Hart, s: Specifier, v: Single) {
    hart.fregisters_mut().set_f_single(s, v.to_bits() as u32);
    hart.set_fs_dirty();
}

fn write_double(hart: &mut Hart, s: Specifier, v: Double) {
    hart.fregisters_mut().set_f(s, v.to_bits() as u64);
    hart.set_fs_dirty();
}

fn accrue(hart: &mut Hart, status: rustc_apfloat::Status) {
    let flags = status_to_fflags(status);
    if flags != 0 {
        hart.fcsr_mut().accrue(flags);
        hart.set_fs_dirty();
    }
}

fn accrue_nv(hart: &mut Hart) {
    hart.fcsr_mut().accrue(float::flags::NV);
    hart.set_fs_dirty();
}

fn fp_arith_s(
    hart: &mut Hart,
    d: &DecodedInsn,
    op: impl FnOnce(Single, Single, Round) -> StatusAnd<Single>,
) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = op(read_single(hart, d.rs1), read_single(hart, d.rs2), rm);
    accrue(hart, status);
    write_single(hart, d.rd, value.canonicalise());
    Ok(())
}

fn fp_arith_d(
    hart: &mut Hart,
    d: &DecodedInsn,
    op: impl FnOnce(Double, Double, Round) -> StatusAnd<Double>,
) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = op(read_double(hart, d.rs1), read_double(hart, d.rs2), rm);
    accrue(hart, status);
    write_double(hart, d.rd, value.canonicalise());
    Ok(())
}

fn fp_fused_s(
    hart: &mut Hart,
    d: &DecodedInsn,
    op: impl FnOnce(Single, Single, Single, Round) -> StatusAnd<Single>,
) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = op(
        read_single(hart, d.rs1),
        read_single(hart, d.rs2),
        read_single(hart, d.rs3),
        rm,
    );
    accrue(hart, status);
    write_single(hart, d.rd, value.canonicalise());
    Ok(())
}

fn fp_fused_d(
    hart: &mut Hart,
    d: &DecodedInsn,
    op: impl FnOnce(Double, Double, Double, Round) -> StatusAnd<Double>,
) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = op(
        read_double(hart, d.rs1),
        read_double(hart, d.rs2),
        read_double(hart, d.rs3),
        rm,
    );
    accrue(hart, status);
    write_double(hart, d.rd, value.canonicalise());
    Ok(())
}

/// Quiet comparison: NV only for signaling operands.
fn fp_eq<F: FloatExt>(hart: &mut Hart, d: &DecodedInsn, a: F, b: F) -> ExecResult {
    if a.is_signaling() || b.is_signaling() {
        accrue_nv(hart);
    }
    hart.set_x(d.rd, (a == b) as u64);
    Ok(())
}

/// Signaling comparison: NV for any NaN operand.
fn fp_lt<F: FloatExt>(hart: &mut Hart, d: &DecodedInsn, a: F, b: F) -> ExecResult {
    if a.is_nan() || b.is_nan() {
        accrue_nv(hart);
    }
    hart.set_x(d.rd, (a < b) as u64);
    Ok(())
}

fn fp_le<F: FloatExt>(hart: &mut Hart, d: &DecodedInsn, a: F, b: F) -> ExecResult {
    if a.is_nan() || b.is_nan() {
        accrue_nv(hart);
    }
    hart.set_x(d.rd, (a <= b) as u64);
    Ok(())
}

//
// RV64F
//

fn flw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u32(hart, d.pc, addr)?;
    hart.fregisters_mut().set_f_single(d.rd, v);
    hart.set_fs_dirty();
    Ok(())
}

fn fsw(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u32(hart, d.pc, addr, hart.fregisters().f(d.rs2) as u32)
}

fn fadd_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_s(hart, d, |a, b, rm| a.add_r(b, rm))
}

fn fsub_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_s(hart, d, |a, b, rm| a.sub_r(b, rm))
}

fn fmul_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_s(hart, d, |a, b, rm| a.mul_r(b, rm))
}

fn fdiv_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_s(hart, d, |a, b, rm| a.div_r(b, rm))
}

fn fsqrt_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let bits = hart.fregisters().f_single(d.rs1);
    let StatusAnd { status, value } = float::sqrt_single(bits, rm);
    accrue(hart, status);
    write_single(hart, d.rd, Single::from_bits(value as u128).canonicalise());
    Ok(())
}

fn fsgnj_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f_single(d.rs1);
    let b = hart.fregisters().f_single(d.rs2);
    hart.fregisters_mut()
        .set_f_single(d.rd, a & 0x7FFF_FFFF | b & 0x8000_0000);
    hart.set_fs_dirty();
    Ok(())
}

fn fsgnjn_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f_single(d.rs1);
    let b = hart.fregisters().f_single(d.rs2);
    hart.fregisters_mut()
        .set_f_single(d.rd, a & 0x7FFF_FFFF | !b & 0x8000_0000);
    hart.set_fs_dirty();
    Ok(())
}

fn fsgnjx_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f_single(d.rs1);
    let b = hart.fregisters().f_single(d.rs2);
    hart.fregisters_mut()
        .set_f_single(d.rd, a ^ b & 0x8000_0000);
    hart.set_fs_dirty();
    Ok(())
}

fn fmin_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let r = fmin(read_single(hart, d.rs1), read_single(hart, d.rs2));
    if r.raise_nv {
        accrue_nv(hart);
    }
    write_single(hart, d.rd, r.value);
    Ok(())
}

fn fmax_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let r = fmax(read_single(hart, d.rs1), read_single(hart, d.rs2));
    if r.raise_nv {
        accrue_nv(hart);
    }
    write_single(hart, d.rd, r.value);
    Ok(())
}

fn fclass_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let class = fclass(read_single(hart, d.rs1));
    hart.set_x(d.rd, class);
    Ok(())
}

fn feq_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_single(hart, d.rs1), read_single(hart, d.rs2));
    fp_eq(hart, d, a, b)
}

fn flt_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_single(hart, d.rs1), read_single(hart, d.rs2));
    fp_lt(hart, d, a, b)
}

fn fle_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_single(hart, d.rs1), read_single(hart, d.rs2));
    fp_le(hart, d, a, b)
}

fn fmadd_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_s(hart, d, |a, b, c, rm| a.mul_add_r(b, c, rm))
}

fn fmsub_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_s(hart, d, |a, b, c, rm| a.mul_add_r(b, -c, rm))
}

fn fnmsub_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_s(hart, d, |a, b, c, rm| (-a).mul_add_r(b, c, rm))
}

fn fnmadd_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_s(hart, d, |a, b, c, rm| (-a).mul_add_r(b, -c, rm))
}

/// Float-to-integer conversion skeleton shared by all eight fcvt.int.fmt forms.
fn fp_to_int<F: FloatExt>(
    hart: &mut Hart,
    d: &DecodedInsn,
    value: F,
    cvt: impl FnOnce(F, Round) -> StatusAnd<u64>,
) -> ExecResult {
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = cvt(nan_to_positive(value), rm);
    accrue(hart, status);
    hart.set_x(d.rd, value);
    Ok(())
}

fn fcvt_w_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_single(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_i128_r(32, rm, &mut false).map(|v| v as i32 as u64)
    })
}

fn fcvt_wu_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_single(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_u128_r(32, rm, &mut false).map(|v| sext32(v as u32))
    })
}

fn fcvt_l_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_single(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_i128_r(64, rm, &mut false).map(|v| v as i64 as u64)
    })
}

fn fcvt_lu_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_single(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_u128_r(64, rm, &mut false).map(|v| v as u64)
    })
}

fn fcvt_s_w(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Single::from_i128_r(hart.x(d.rs1) as i32 as i128, rm);
    accrue(hart, status);
    write_single(hart, d.rd, value);
    Ok(())
}

fn fcvt_s_wu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Single::from_u128_r(hart.x(d.rs1) as u32 as u128, rm);
    accrue(hart, status);
    write_single(hart, d.rd, value);
    Ok(())
}

fn fcvt_s_l(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Single::from_i128_r(hart.x(d.rs1) as i64 as i128, rm);
    accrue(hart, status);
    write_single(hart, d.rd, value);
    Ok(())
}

fn fcvt_s_lu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = Single::from_u128_r(hart.x(d.rs1) as u128, rm);
    accrue(hart, status);
    write_single(hart, d.rd, value);
    Ok(())
}

fn fmv_x_w(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    // A raw bit move of the low 32 bits, sign-extended; the NaN box is not inspected.
    hart.set_x(d.rd, sext32(hart.fregisters().f(d.rs1) as u32));
    Ok(())
}

fn fmv_w_x(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let bits = hart.x(d.rs1) as u32;
    hart.fregisters_mut().set_f_single(d.rd, bits);
    hart.set_fs_dirty();
    Ok(())
}

//
// RV64D
//

fn fld(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    let v = mmu.read_u64(hart, d.pc, addr)?;
    hart.fregisters_mut().set_f(d.rd, v);
    hart.set_fs_dirty();
    Ok(())
}

fn fsd(hart: &mut Hart, mmu: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let addr = hart.x(d.rs1).wrapping_add(d.imm);
    mmu.write_u64(hart, d.pc, addr, hart.fregisters().f(d.rs2))
}

fn fadd_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_d(hart, d, |a, b, rm| a.add_r(b, rm))
}

fn fsub_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_d(hart, d, |a, b, rm| a.sub_r(b, rm))
}

fn fmul_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_d(hart, d, |a, b, rm| a.mul_r(b, rm))
}

fn fdiv_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_arith_d(hart, d, |a, b, rm| a.div_r(b, rm))
}

fn fsqrt_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let bits = hart.fregisters().f(d.rs1);
    let StatusAnd { status, value } = float::sqrt_double(bits, rm);
    accrue(hart, status);
    write_double(hart, d.rd, Double::from_bits(value as u128).canonicalise());
    Ok(())
}

fn fsgnj_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f(d.rs1);
    let b = hart.fregisters().f(d.rs2);
    hart.fregisters_mut()
        .set_f(d.rd, a & !(1 << 63) | b & 1 << 63);
    hart.set_fs_dirty();
    Ok(())
}

fn fsgnjn_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f(d.rs1);
    let b = hart.fregisters().f(d.rs2);
    hart.fregisters_mut()
        .set_f(d.rd, a & !(1 << 63) | !b & 1 << 63);
    hart.set_fs_dirty();
    Ok(())
}

fn fsgnjx_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let a = hart.fregisters().f(d.rs1);
    let b = hart.fregisters().f(d.rs2);
    hart.fregisters_mut().set_f(d.rd, a ^ b & 1 << 63);
    hart.set_fs_dirty();
    Ok(())
}

fn fmin_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let r = fmin(read_double(hart, d.rs1), read_double(hart, d.rs2));
    if r.raise_nv {
        accrue_nv(hart);
    }
    write_double(hart, d.rd, r.value);
    Ok(())
}

fn fmax_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let r = fmax(read_double(hart, d.rs1), read_double(hart, d.rs2));
    if r.raise_nv {
        accrue_nv(hart);
    }
    write_double(hart, d.rd, r.value);
    Ok(())
}

fn fclass_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let class = fclass(read_double(hart, d.rs1));
    hart.set_x(d.rd, class);
    Ok(())
}

fn feq_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_double(hart, d.rs1), read_double(hart, d.rs2));
    fp_eq(hart, d, a, b)
}

fn flt_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_double(hart, d.rs1), read_double(hart, d.rs2));
    fp_lt(hart, d, a, b)
}

fn fle_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let (a, b) = (read_double(hart, d.rs1), read_double(hart, d.rs2));
    fp_le(hart, d, a, b)
}

fn fmadd_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_d(hart, d, |a, b, c, rm| a.mul_add_r(b, c, rm))
}

fn fmsub_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_d(hart, d, |a, b, c, rm| a.mul_add_r(b, -c, rm))
}

fn fnmsub_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_d(hart, d, |a, b, c, rm| (-a).mul_add_r(b, c, rm))
}

fn fnmadd_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    fp_fused_d(hart, d, |a, b, c, rm| (-a).mul_add_r(b, -c, rm))
}

fn fcvt_w_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_double(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_i128_r(32, rm, &mut false).map(|v| v as i32 as u64)
    })
}

fn fcvt_wu_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_double(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_u128_r(32, rm, &mut false).map(|v| sext32(v as u32))
    })
}

fn fcvt_l_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_double(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_i128_r(64, rm, &mut false).map(|v| v as i64 as u64)
    })
}

fn fcvt_lu_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let v = read_double(hart, d.rs1);
    fp_to_int(hart, d, v, |v, rm| {
        v.to_u128_r(64, rm, &mut false).map(|v| v as u64)
    })
}

fn fcvt_d_w(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Double::from_i128_r(hart.x(d.rs1) as i32 as i128, rm);
    accrue(hart, status);
    write_double(hart, d.rd, value);
    Ok(())
}

fn fcvt_d_wu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Double::from_u128_r(hart.x(d.rs1) as u32 as u128, rm);
    accrue(hart, status);
    write_double(hart, d.rd, value);
    Ok(())
}

fn fcvt_d_l(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } =
        Double::from_i128_r(hart.x(d.rs1) as i64 as i128, rm);
    accrue(hart, status);
    write_double(hart, d.rd, value);
    Ok(())
}

fn fcvt_d_lu(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let StatusAnd { status, value } = Double::from_u128_r(hart.x(d.rs1) as u128, rm);
    accrue(hart, status);
    write_double(hart, d.rd, value);
    Ok(())
}

fn fcvt_s_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let mut loses_info = false;
    let StatusAnd { status, value } =
        FloatConvert::<Single>::convert_r(read_double(hart, d.rs1), rm, &mut loses_info);
    accrue(hart, status);
    write_single(hart, d.rd, value.canonicalise());
    Ok(())
}

fn fcvt_d_s(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let rm = rounding(hart, d)?;
    let mut loses_info = false;
    let StatusAnd { status, value } =
        FloatConvert::<Double>::convert_r(read_single(hart, d.rs1), rm, &mut loses_info);
    accrue(hart, status);
    write_double(hart, d.rd, value.canonicalise());
    Ok(())
}

fn fmv_x_d(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    hart.set_x(d.rd, hart.fregisters().f(d.rs1));
    Ok(())
}

fn fmv_d_x(hart: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    check_fs(hart, d)?;
    let bits = hart.x(d.rs1);
    hart.fregisters_mut().set_f(d.rd, bits);
    hart.set_fs_dirty();
    Ok(())
}

//
// Pseudo-ops
//

fn nop(_: &mut Hart, _: &mut Mmu, _: &DecodedInsn) -> ExecResult {
    Ok(())
}

fn inv(_: &mut Hart, _: &mut Mmu, d: &DecodedInsn) -> ExecResult {
    Err(illegal(d))
}

/// Maps an opcode to its execute function.
///
/// The compressed instructions dispatch to the base handlers; their operand fields were placed
/// by the decoder.
pub fn lookup(opcode: Opcode) -> ExecFn {
    use Opcode::*;
    match opcode {
        Add => add,
        Addi => addi,
        Addiw => addiw,
        Addw => addw,
        And => and,
        Andi => andi,
        Auipc => auipc,
        Beq => beq,
        Bge => bge,
        Bgeu => bgeu,
        Blt => blt,
        Bltu => bltu,
        Bne => bne,
        Fence => fence,
        FenceI => fence_i,
        Jal => jal,
        Jalr => jalr,
        Lb => lb,
        Lbu => lbu,
        Ld => ld,
        Lh => lh,
        Lhu => lhu,
        Lui => lui,
        Lw => lw,
        Lwu => lwu,
        Or => or,
        Ori => ori,
        Sb => sb,
        Sd => sd,
        Sh => sh,
        Sll => sll,
        Slli => slli,
        Slliw => slliw,
        Sllw => sllw,
        Slt => slt,
        Slti => slti,
        Sltiu => sltiu,
        Sltu => sltu,
        Sra => sra,
        Srai => srai,
        Sraiw => sraiw,
        Sraw => sraw,
        Srl => srl,
        Srli => srli,
        Srliw => srliw,
        Srlw => srlw,
        Sub => sub,
        Subw => subw,
        Sw => sw,
        Xor => xor,
        Xori => xori,
        Csrrc => csrrc,
        Csrrci => csrrci,
        Csrrs => csrrs,
        Csrrsi => csrrsi,
        Csrrw => csrrw,
        Csrrwi => csrrwi,
        Ebreak => ebreak,
        Ecall => ecall,
        Mret => mret,
        Sret => sret,
        Wfi => wfi,
        SfenceVma => sfence_vma,
        Div => div,
        Divu => divu,
        Divuw => divuw,
        Divw => divw,
        Mul => mul,
        Mulh => mulh,
        Mulhsu => mulhsu,
        Mulhu => mulhu,
        Mulw => mulw,
        Rem => rem,
        Remu => remu,
        Remuw => remuw,
        Remw => remw,
        LrW => lr_w,
        LrD => lr_d,
        ScW => sc_w,
        ScD => sc_d,
        AmoaddW => amoadd_w,
        AmoaddD => amoadd_d,
        AmoandW => amoand_w,
        AmoandD => amoand_d,
        AmomaxW => amomax_w,
        AmomaxD => amomax_d,
        AmomaxuW => amomaxu_w,
        AmomaxuD => amomaxu_d,
        AmominW => amomin_w,
        AmominD => amomin_d,
        AmominuW => amominu_w,
        AmominuD => amominu_d,
        AmoorW => amoor_w,
        AmoorD => amoor_d,
        AmoswapW => amoswap_w,
        AmoswapD => amoswap_d,
        AmoxorW => amoxor_w,
        AmoxorD => amoxor_d,
        Flw => flw,
        Fsw => fsw,
        FaddS => fadd_s,
        FsubS => fsub_s,
        FmulS => fmul_s,
        FdivS => fdiv_s,
        FsqrtS => fsqrt_s,
        FsgnjS => fsgnj_s,
        FsgnjnS => fsgnjn_s,
        FsgnjxS => fsgnjx_s,
        FminS => fmin_s,
        FmaxS => fmax_s,
        FclassS => fclass_s,
        FeqS => feq_s,
        FltS => flt_s,
        FleS => fle_s,
        FmaddS => fmadd_s,
        FmsubS => fmsub_s,
        FnmsubS => fnmsub_s,
        FnmaddS => fnmadd_s,
        FcvtWS => fcvt_w_s,
        FcvtWuS => fcvt_wu_s,
        FcvtLS => fcvt_l_s,
        FcvtLuS => fcvt_lu_s,
        FcvtSW => fcvt_s_w,
        FcvtSWu => fcvt_s_wu,
        FcvtSL => fcvt_s_l,
        FcvtSLu => fcvt_s_lu,
        FmvXW => fmv_x_w,
        FmvWX => fmv_w_x,
        Fld => fld,
        Fsd => fsd,
        FaddD => fadd_d,
        FsubD => fsub_d,
        FmulD => fmul_d,
        FdivD => fdiv_d,
        FsqrtD => fsqrt_d,
        FsgnjD => fsgnj_d,
        FsgnjnD => fsgnjn_d,
        FsgnjxD => fsgnjx_d,
        FminD => fmin_d,
        FmaxD => fmax_d,
        FclassD => fclass_d,
        FeqD => feq_d,
        FltD => flt_d,
        FleD => fle_d,
        FmaddD => fmadd_d,
        FmsubD => fmsub_d,
        FnmsubD => fnmsub_d,
        FnmaddD => fnmadd_d,
        FcvtWD => fcvt_w_d,
        FcvtWuD => fcvt_wu_d,
        FcvtLD => fcvt_l_d,
        FcvtLuD => fcvt_lu_d,
        FcvtDW => fcvt_d_w,
        FcvtDWu => fcvt_d_wu,
        FcvtDL => fcvt_d_l,
        FcvtDLu => fcvt_d_lu,
        FcvtSD => fcvt_s_d,
        FcvtDS => fcvt_d_s,
        FmvXD => fmv_x_d,
        FmvDX => fmv_d_x,
        CNop => nop,
        CAddi | CAddi16sp | CAddi4spn | CLi => addi,
        CAddiw => addiw,
        CLui => lui,
        CSrli => srli,
        CSrai => srai,
        CAndi => andi,
        CSub => sub,
        CXor => xor,
        COr => or,
        CAnd => and,
        CSubw => subw,
        CAddw => addw,
        CJ => jal,
        CBeqz => beq,
        CBnez => bne,
        CFld | CFldsp => fld,
        CLw | CLwsp => lw,
        CLd | CLdsp => ld,
        CFsd | CFsdsp => fsd,
        CSw | CSwsp => sw,
        CSd | CSdsp => sd,
        CSlli => slli,
        CJr | CJalr => jalr,
        CMv => add,
        CEbreak => ebreak,
        CAdd => add,
        Inv | CInv => inv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::core::{csr, Config, IrqHub};
    use crate::dram::{Dram, DRAM_BASE};
    use crate::instruction::{decode, InsnLen};
    use std::sync::Arc;

    fn setup() -> (Hart, Mmu) {
        let bus = Arc::new(Bus::new(Dram::new(DRAM_BASE, 0x10000).unwrap()));
        let hart = Hart::new(Arc::new(IrqHub::new()), Config::default());
        (hart, Mmu::new(bus))
    }

    /// Decodes and executes one 32-bit instruction at an arbitrary PC, advancing the PC first
    /// as the engine would.
    fn exec(hart: &mut Hart, mmu: &mut Mmu, insn: u32) -> ExecResult {
        let d = decode(insn, InsnLen::of(insn), hart.pc());
        hart.set_pc(hart.pc().wrapping_add(d.len.size()));
        (d.exec)(hart, mmu, &d)
    }

    fn x(i: u8) -> Specifier {
        Specifier::from_u5(i)
    }

    #[test]
    fn test_addi_and_x0() {
        let (mut hart, mut mmu) = setup();
        // addi x1, x0, 5
        exec(&mut hart, &mut mmu, 0x0050_0093).unwrap();
        assert_eq!(5, hart.x(x(1)));
        // addi x0, x0, 5 leaves x0 at zero
        exec(&mut hart, &mut mmu, 0x0050_0013).unwrap();
        assert_eq!(0, hart.x(x(0)));
    }

    #[test]
    fn test_divw_overflow_corner() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), 0x8000_0000);
        hart.set_x(x(2), 0xFFFF_FFFF);
        // divw x3, x1, x2
        exec(&mut hart, &mut mmu, 0x0220_C1BB).unwrap();
        assert_eq!(0xFFFF_FFFF_8000_0000, hart.x(x(3)));
    }

    #[test]
    fn test_div_by_zero() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), 42);
        // div x3, x1, x0
        exec(&mut hart, &mut mmu, 0x0200_C1B3).unwrap();
        assert_eq!(u64::MAX, hart.x(x(3)));
        // rem x3, x1, x0 yields the dividend
        exec(&mut hart, &mut mmu, 0x0200_E1B3).unwrap();
        assert_eq!(42, hart.x(x(3)));
    }

    #[test]
    fn test_shifts_use_six_bits() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), 1);
        hart.set_x(x(2), 63);
        // sll x3, x1, x2
        exec(&mut hart, &mut mmu, 0x0020_91B3).unwrap();
        assert_eq!(1 << 63, hart.x(x(3)));
        // sllw only uses 5 bits: shift by 33 becomes shift by 1
        hart.set_x(x(2), 33);
        exec(&mut hart, &mut mmu, 0x0020_91BB).unwrap();
        assert_eq!(2, hart.x(x(3)));
    }

    #[test]
    fn test_jal_links_past_instruction() {
        let (mut hart, mut mmu) = setup();
        hart.set_pc(DRAM_BASE);
        // jal x1, 8
        exec(&mut hart, &mut mmu, 0x0080_00EF).unwrap();
        assert_eq!(DRAM_BASE + 8, hart.pc());
        assert_eq!(DRAM_BASE + 4, hart.x(x(1)));
    }

    #[test]
    fn test_jalr_masks_low_bit() {
        let (mut hart, mut mmu) = setup();
        hart.set_pc(DRAM_BASE);
        hart.set_x(x(5), DRAM_BASE + 0x101);
        // jalr x1, 0(x5)
        exec(&mut hart, &mut mmu, 0x0002_80E7).unwrap();
        assert_eq!(DRAM_BASE + 0x100, hart.pc());
        assert_eq!(DRAM_BASE + 4, hart.x(x(1)));
    }

    #[test]
    fn test_load_store_round_trip() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), DRAM_BASE);
        hart.set_x(x(2), 0xDEAD_BEEF_CAFE_F00D);
        // sd x2, 16(x1)
        exec(&mut hart, &mut mmu, 0x0020_B823).unwrap();
        // ld x3, 16(x1)
        exec(&mut hart, &mut mmu, 0x0100_B183).unwrap();
        assert_eq!(0xDEAD_BEEF_CAFE_F00D, hart.x(x(3)));
        // lb x4, 16(x1): sign-extended low byte
        exec(&mut hart, &mut mmu, 0x0100_8203).unwrap();
        assert_eq!(0x0D, hart.x(x(4)));
        // lw x4, 20(x1): sign-extended high word
        exec(&mut hart, &mut mmu, 0x0140_A203).unwrap();
        assert_eq!(0xFFFF_FFFF_DEAD_BEEF, hart.x(x(4)));
    }

    #[test]
    fn test_ecall_cause_tracks_privilege() {
        let (mut hart, mut mmu) = setup();
        let trap = exec(&mut hart, &mut mmu, 0x0000_0073).unwrap_err();
        assert_eq!(
            crate::core::trap::Cause::Exception(Exception::EnvironmentCallFromMMode),
            trap.cause
        );
    }

    #[test]
    fn test_ebreak_reports_pc() {
        let (mut hart, mut mmu) = setup();
        hart.set_pc(DRAM_BASE + 0x40);
        let trap = exec(&mut hart, &mut mmu, 0x0010_0073).unwrap_err();
        assert_eq!(
            crate::core::trap::Cause::Exception(Exception::Breakpoint),
            trap.cause
        );
        assert_eq!(DRAM_BASE + 0x40, trap.tval);
        assert_eq!(DRAM_BASE + 0x40, trap.pc);
    }

    #[test]
    fn test_invalid_instruction_reports_raw_word() {
        let (mut hart, mut mmu) = setup();
        let trap = exec(&mut hart, &mut mmu, 0xFFFF_FFFF).unwrap_err();
        assert_eq!(
            crate::core::trap::Cause::Exception(Exception::IllegalInstruction),
            trap.cause
        );
        assert_eq!(0xFFFF_FFFF, trap.tval);
    }

    #[test]
    fn test_csrrw_rd_x0_skips_read() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), 0x8000_0000);
        // csrrw x0, mtvec, x1: write only
        exec(&mut hart, &mut mmu, 0x3050_9073).unwrap();
        assert_eq!(
            0x8000_0000,
            hart.read_csr(csr::MTVEC, PrivilegeLevel::Machine).unwrap()
        );
    }

    #[test]
    fn test_csrrs_rs1_x0_skips_write() {
        let (mut hart, mut mmu) = setup();
        // csrrs x1, mvendorid, x0: pure read of a read-only CSR must not trap
        exec(&mut hart, &mut mmu, 0xF110_20F3).unwrap();
        assert_eq!(0, hart.x(x(1)));
        // csrrs x1, mvendorid, x2 with x2 != x0 attempts the write and traps
        hart.set_x(x(2), 1);
        assert!(exec(&mut hart, &mut mmu, 0xF111_20F3).is_err());
    }

    #[test]
    fn test_lr_sc_sequence_e3() {
        let (mut hart, mut mmu) = setup();
        let addr = DRAM_BASE + 0x100;
        hart.set_x(x(10), addr);
        mmu.bus().write_u64(addr, 1234);

        // lr.d x1, (x10)
        exec(&mut hart, &mut mmu, 0x1005_30AF).unwrap();
        assert_eq!(1234, hart.x(x(1)));
        // sd x0, (x10): plain store kills the reservation
        exec(&mut hart, &mut mmu, 0x0005_3023).unwrap();
        // sc.d x2, x0, (x10)
        exec(&mut hart, &mut mmu, 0x1805_312F).unwrap();
        assert_eq!(1, hart.x(x(2)));
        // The intervening store's value survives.
        assert_eq!(Some(0), mmu.bus().read_u64(addr));
    }

    #[test]
    fn test_amoadd() {
        let (mut hart, mut mmu) = setup();
        let addr = DRAM_BASE + 0x200;
        hart.set_x(x(3), addr);
        hart.set_x(x(2), 5);
        mmu.bus().write_u32(addr, 7);
        // amoadd.w x1, x2, (x3)
        exec(&mut hart, &mut mmu, 0x0021_A0AF).unwrap();
        assert_eq!(7, hart.x(x(1)));
        assert_eq!(Some(12), mmu.bus().read_u32(addr));
    }

    #[test]
    fn test_fp_disabled_traps() {
        let (mut hart, mut mmu) = setup();
        hart.status_mut().write_mstatus(0, 0b11 << 13); // FS = Off
        // fadd.s f1, f2, f3
        assert!(exec(&mut hart, &mut mmu, 0x0031_00D3).is_err());
    }

    #[test]
    fn test_fadd_s() {
        let (mut hart, mut mmu) = setup();
        hart.fregisters_mut().set_f_single(x(2), 0x3F80_0000); // 1.0
        hart.fregisters_mut().set_f_single(x(3), 0x4000_0000); // 2.0
        // fadd.s f1, f2, f3
        exec(&mut hart, &mut mmu, 0x0031_00D3).unwrap();
        assert_eq!(0x4040_0000, hart.fregisters().f_single(x(1))); // 3.0
        assert_eq!(0, hart.fcsr().fflags());
    }

    #[test]
    fn test_fdiv_by_zero_sets_dz() {
        let (mut hart, mut mmu) = setup();
        hart.fregisters_mut().set_f_single(x(2), 0x3F80_0000); // 1.0
        hart.fregisters_mut().set_f_single(x(3), 0x0000_0000); // 0.0
        // fdiv.s f1, f2, f3
        exec(&mut hart, &mut mmu, 0x1831_00D3).unwrap();
        assert_eq!(0x7F80_0000, hart.fregisters().f_single(x(1))); // +inf
        assert_ne!(0, hart.fcsr().fflags() & float::flags::DZ as u64);
    }

    #[test]
    fn test_invalid_rounding_mode_traps() {
        let (mut hart, mut mmu) = setup();
        // fadd.s f1, f2, f3 with rm=0b101 (reserved)
        assert!(exec(&mut hart, &mut mmu, 0x0031_50D3).is_err());
    }

    #[test]
    fn test_fcvt_w_s_nan_gives_max() {
        let (mut hart, mut mmu) = setup();
        hart.fregisters_mut().set_f_single(x(1), 0x7FC0_0000); // qNaN
        // fcvt.w.s x2, f1, rtz
        exec(&mut hart, &mut mmu, 0xC000_9153).unwrap();
        assert_eq!(i32::MAX as u64, hart.x(x(2)));
        assert_ne!(0, hart.fcsr().fflags() & float::flags::NV as u64);
    }

    #[test]
    fn test_fmv_round_trip() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(1), 0xC0D0_0000);
        // fmv.w.x f1, x1
        exec(&mut hart, &mut mmu, 0xF000_80D3).unwrap();
        assert_eq!(0xFFFF_FFFF_C0D0_0000, hart.fregisters().f(x(1)));
        // fmv.x.w x2, f1
        exec(&mut hart, &mut mmu, 0xE000_8153).unwrap();
        assert_eq!(0xFFFF_FFFF_C0D0_0000, hart.x(x(2)));
    }

    #[test]
    fn test_mret_requires_machine_mode() {
        let (mut hart, mut mmu) = setup();
        // Drop to U-mode first.
        hart.status_mut().set_mpp(crate::RawPrivilegeLevel::User);
        hart.do_mret();
        assert_eq!(PrivilegeLevel::User, hart.privilege());
        let trap = exec(&mut hart, &mut mmu, 0x3020_0073).unwrap_err();
        assert_eq!(
            crate::core::trap::Cause::Exception(Exception::IllegalInstruction),
            trap.cause
        );
    }

    #[test]
    fn test_wfi_illegal_from_user() {
        let (mut hart, mut mmu) = setup();
        hart.status_mut().set_mpp(crate::RawPrivilegeLevel::User);
        hart.do_mret();
        assert!(exec(&mut hart, &mut mmu, 0x1050_0073).is_err());
    }

    #[test]
    fn test_wfi_returns_when_interrupt_pending() {
        let (mut hart, mut mmu) = setup();
        hart.write_csr(
            csr::MIE,
            PrivilegeLevel::Machine,
            crate::core::interrupts::MTIP,
            u64::MAX,
        )
        .unwrap();
        hart.hub()
            .set_interrupt_pending(crate::core::interrupts::MTIP, true);
        // Completes immediately because MTIP is already pending.
        exec(&mut hart, &mut mmu, 0x1050_0073).unwrap();
    }

    #[test]
    fn test_compressed_expansion() {
        let (mut hart, mut mmu) = setup();
        hart.set_x(x(11), 25);
        // c.mv x10, x11
        exec(&mut hart, &mut mmu, 0x852E).unwrap();
        assert_eq!(25, hart.x(x(10)));
        // c.addi x10, 3
        exec(&mut hart, &mut mmu, 0x050D).unwrap();
        assert_eq!(28, hart.x(x(10)));
        // c.slli x10, 1
        exec(&mut hart, &mut mmu, 0x0506).unwrap();
        assert_eq!(56, hart.x(x(10)));
    }

    #[test]
    fn test_compressed_jump_links_two_bytes() {
        let (mut hart, mut mmu) = setup();
        hart.set_pc(DRAM_BASE);
        hart.set_x(x(5), DRAM_BASE + 0x80);
        // c.jalr x5
        exec(&mut hart, &mut mmu, 0x9282).unwrap();
        assert_eq!(DRAM_BASE + 0x80, hart.pc());
        assert_eq!(DRAM_BASE + 2, hart.x(x(1)));
    }
}
