//! Instruction and register model
//!
//! A fixed RISC-flavored instruction set covering what handler code needs:
//! immediate materialization, ALU and shift operations, word loads/stores,
//! compare-and-branch, calls, and system-register moves. Each value is one
//! target instruction; wider immediates are built from MovZ/MovK chains by
//! the generators.

use serde::{Deserialize, Serialize};
use std::fmt;

use vex_common::{Address, LabelId, PrivilegeLevel, SecurityState};

/// Bit position of the exception-class field within a syndrome register.
pub const SYNDROME_EC_LSB: u8 = 26;

/// Bit position of the previous-privilege field within a saved-status
/// register.
pub const STATUS_PL_LSB: u8 = 2;

/// General-purpose register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reg(pub u8);

impl Reg {
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// System registers, banked by privilege level where the architecture banks
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SysReg {
    /// Vector base address, banked by privilege level and security state.
    VectorBase(PrivilegeLevel, SecurityState),
    /// Trap syndrome (cause and exception-class field).
    Syndrome(PrivilegeLevel),
    /// Faulting address captured on a trap.
    FaultAddress(PrivilegeLevel),
    /// Return address a trap-return branches to.
    ReturnAddress(PrivilegeLevel),
    /// Saved status, including the previous-privilege field.
    SavedStatus(PrivilegeLevel),
    /// Current privilege level, read-only.
    CurrentPrivilege,
}

impl fmt::Display for SysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysReg::VectorBase(pl, SecurityState::Secure) => write!(f, "vbar_{pl}_s"),
            SysReg::VectorBase(pl, SecurityState::NonSecure) => write!(f, "vbar_{pl}_ns"),
            SysReg::Syndrome(pl) => write!(f, "syn_{pl}"),
            SysReg::FaultAddress(pl) => write!(f, "far_{pl}"),
            SysReg::ReturnAddress(pl) => write!(f, "ret_{pl}"),
            SysReg::SavedStatus(pl) => write!(f, "sst_{pl}"),
            SysReg::CurrentPrivilege => write!(f, "curpl"),
        }
    }
}

/// Branch target - either a resolved absolute address or a label the
/// emission service resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Addr(Address),
    Label(LabelId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Addr(addr) => write!(f, "{addr:#x}"),
            Target::Label(label) => write!(f, "L{label}"),
        }
    }
}

/// One target instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    /// rd = imm16 << shift, clearing the other bits.
    MovZ(Reg, u16, u8),
    /// Insert imm16 at shift, keeping the other bits.
    MovK(Reg, u16, u8),
    /// rd = rs
    Mov(Reg, Reg),

    Add(Reg, Reg, Reg),
    Sub(Reg, Reg, Reg),
    AddI(Reg, Reg, u16),
    SubI(Reg, Reg, u16),
    And(Reg, Reg, Reg),
    Orr(Reg, Reg, Reg),
    AndI(Reg, Reg, u64),
    OrrI(Reg, Reg, u64),
    Lsl(Reg, Reg, u8),
    Lsr(Reg, Reg, u8),

    /// rd = memory[base + byte offset]
    Ldr(Reg, Reg, i16),
    /// memory[base + byte offset] = rs
    Str(Reg, Reg, i16),

    /// Branch if zero / non-zero.
    Cbz(Reg, Target),
    Cbnz(Reg, Target),
    /// Unconditional branch.
    B(Target),
    /// Branch with link.
    Bl(Target),
    /// Indirect branch / indirect branch with link.
    Br(Reg),
    Blr(Reg),
    /// Return through the link register.
    Ret,
    /// Trap return to the saved return address and status.
    Eret,

    /// Read / write a system register.
    Mrs(Reg, SysReg),
    Msr(SysReg, Reg),

    Nop,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::MovZ(rd, imm, sh) => write!(f, "movz {rd}, #{imm:#x}, lsl #{sh}"),
            Instr::MovK(rd, imm, sh) => write!(f, "movk {rd}, #{imm:#x}, lsl #{sh}"),
            Instr::Mov(rd, rs) => write!(f, "mov {rd}, {rs}"),
            Instr::Add(rd, rs, rt) => write!(f, "add {rd}, {rs}, {rt}"),
            Instr::Sub(rd, rs, rt) => write!(f, "sub {rd}, {rs}, {rt}"),
            Instr::AddI(rd, rs, imm) => write!(f, "add {rd}, {rs}, #{imm}"),
            Instr::SubI(rd, rs, imm) => write!(f, "sub {rd}, {rs}, #{imm}"),
            Instr::And(rd, rs, rt) => write!(f, "and {rd}, {rs}, {rt}"),
            Instr::Orr(rd, rs, rt) => write!(f, "orr {rd}, {rs}, {rt}"),
            Instr::AndI(rd, rs, imm) => write!(f, "and {rd}, {rs}, #{imm:#x}"),
            Instr::OrrI(rd, rs, imm) => write!(f, "orr {rd}, {rs}, #{imm:#x}"),
            Instr::Lsl(rd, rs, sh) => write!(f, "lsl {rd}, {rs}, #{sh}"),
            Instr::Lsr(rd, rs, sh) => write!(f, "lsr {rd}, {rs}, #{sh}"),
            Instr::Ldr(rd, base, off) => write!(f, "ldr {rd}, [{base}, #{off}]"),
            Instr::Str(rs, base, off) => write!(f, "str {rs}, [{base}, #{off}]"),
            Instr::Cbz(rs, target) => write!(f, "cbz {rs}, {target}"),
            Instr::Cbnz(rs, target) => write!(f, "cbnz {rs}, {target}"),
            Instr::B(target) => write!(f, "b {target}"),
            Instr::Bl(target) => write!(f, "bl {target}"),
            Instr::Br(rs) => write!(f, "br {rs}"),
            Instr::Blr(rs) => write!(f, "blr {rs}"),
            Instr::Ret => write!(f, "ret"),
            Instr::Eret => write!(f, "eret"),
            Instr::Mrs(rd, sys) => write!(f, "mrs {rd}, {sys}"),
            Instr::Msr(sys, rs) => write!(f, "msr {sys}, {rs}"),
            Instr::Nop => write!(f, "nop"),
        }
    }
}
