//! Interpreter over recorded code
//!
//! Executes a recorded instruction range against the [`RecordingEmitter`]'s
//! architectural model. Tests use this to observe what generated code does
//! (stack round-trips, walker results) instead of matching instruction text.

use log::trace;

use vex_common::{Address, GenError, GenResult};

use crate::instr::{Instr, Reg, Target};
use crate::recording::RecordingEmitter;

/// Address a top-level `ret` lands on to end execution.
const RETURN_SENTINEL: Address = 0xdead_0000;

/// Why execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Returned through the link register to the caller.
    Returned,
    /// Executed a trap return.
    TrapReturn,
    /// Step budget exhausted.
    MaxSteps,
}

/// Result of executing a recorded range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub steps: usize,
    pub stop: StopReason,
}

impl RecordingEmitter {
    fn target_address(&self, target: Target) -> GenResult<Address> {
        match target {
            Target::Addr(addr) => Ok(addr),
            Target::Label(label) => self
                .label_address(label)
                .ok_or(GenError::UnboundLabel { label }),
        }
    }

    fn reg_read(&self, reg: Reg) -> u64 {
        self.gprs[reg.index() as usize]
    }

    fn reg_write(&mut self, reg: Reg, value: u64) {
        self.gprs[reg.index() as usize] = value;
    }

    fn load_word(&self, addr: Address) -> GenResult<u64> {
        if addr % self.arch.word_size != 0 {
            return Err(GenError::InvalidState {
                message: format!("misaligned load at {addr:#x}"),
            });
        }
        Ok(self.memory.get(&addr).copied().unwrap_or(0))
    }

    fn store_word(&mut self, addr: Address, value: u64) -> GenResult<()> {
        if addr % self.arch.word_size != 0 {
            return Err(GenError::InvalidState {
                message: format!("misaligned store at {addr:#x}"),
            });
        }
        self.memory.insert(addr, value);
        Ok(())
    }

    /// Execute recorded code starting at `entry` until it returns to the
    /// caller, performs a trap return, or exhausts `max_steps`.
    ///
    /// The link register is pointed at a sentinel first, so a routine body
    /// ending in `ret` stops cleanly; nested calls return into recorded
    /// code as usual.
    pub fn execute(&mut self, entry: Address, max_steps: usize) -> GenResult<ExecOutcome> {
        let link = Reg(self.arch.link_register);
        let width = self.arch.instr_width;
        self.reg_write(link, RETURN_SENTINEL);
        let mut pc = entry;
        let mut steps = 0;

        while steps < max_steps {
            if pc == RETURN_SENTINEL {
                return Ok(ExecOutcome {
                    steps,
                    stop: StopReason::Returned,
                });
            }
            let index = *self.code_index.get(&pc).ok_or_else(|| GenError::InvalidState {
                message: format!("no instruction at {pc:#x}"),
            })?;
            let instr = self.records[index].instr;
            trace!("exec {pc:#010x}: {instr}");
            steps += 1;
            let mut next = pc + width;

            match instr {
                Instr::MovZ(rd, imm, sh) => self.reg_write(rd, u64::from(imm) << sh),
                Instr::MovK(rd, imm, sh) => {
                    let keep = self.reg_read(rd) & !(0xffffu64 << sh);
                    self.reg_write(rd, keep | (u64::from(imm) << sh));
                }
                Instr::Mov(rd, rs) => self.reg_write(rd, self.reg_read(rs)),
                Instr::Add(rd, rs, rt) => {
                    self.reg_write(rd, self.reg_read(rs).wrapping_add(self.reg_read(rt)));
                }
                Instr::Sub(rd, rs, rt) => {
                    self.reg_write(rd, self.reg_read(rs).wrapping_sub(self.reg_read(rt)));
                }
                Instr::AddI(rd, rs, imm) => {
                    self.reg_write(rd, self.reg_read(rs).wrapping_add(u64::from(imm)));
                }
                Instr::SubI(rd, rs, imm) => {
                    self.reg_write(rd, self.reg_read(rs).wrapping_sub(u64::from(imm)));
                }
                Instr::And(rd, rs, rt) => {
                    self.reg_write(rd, self.reg_read(rs) & self.reg_read(rt));
                }
                Instr::Orr(rd, rs, rt) => {
                    self.reg_write(rd, self.reg_read(rs) | self.reg_read(rt));
                }
                Instr::AndI(rd, rs, imm) => self.reg_write(rd, self.reg_read(rs) & imm),
                Instr::OrrI(rd, rs, imm) => self.reg_write(rd, self.reg_read(rs) | imm),
                Instr::Lsl(rd, rs, sh) => self.reg_write(rd, self.reg_read(rs) << sh),
                Instr::Lsr(rd, rs, sh) => self.reg_write(rd, self.reg_read(rs) >> sh),
                Instr::Ldr(rd, base, off) => {
                    let addr = self.reg_read(base).wrapping_add_signed(i64::from(off));
                    let value = self.load_word(addr)?;
                    self.reg_write(rd, value);
                }
                Instr::Str(rs, base, off) => {
                    let addr = self.reg_read(base).wrapping_add_signed(i64::from(off));
                    let value = self.reg_read(rs);
                    self.store_word(addr, value)?;
                }
                Instr::Cbz(rs, target) => {
                    if self.reg_read(rs) == 0 {
                        next = self.target_address(target)?;
                    }
                }
                Instr::Cbnz(rs, target) => {
                    if self.reg_read(rs) != 0 {
                        next = self.target_address(target)?;
                    }
                }
                Instr::B(target) => next = self.target_address(target)?,
                Instr::Bl(target) => {
                    self.reg_write(link, pc + width);
                    next = self.target_address(target)?;
                }
                Instr::Br(rs) => next = self.reg_read(rs),
                Instr::Blr(rs) => {
                    let dest = self.reg_read(rs);
                    self.reg_write(link, pc + width);
                    next = dest;
                }
                Instr::Ret => next = self.reg_read(link),
                Instr::Eret => {
                    return Ok(ExecOutcome {
                        steps,
                        stop: StopReason::TrapReturn,
                    });
                }
                Instr::Mrs(rd, sys) => {
                    let value = self.sysreg(sys);
                    self.reg_write(rd, value);
                }
                Instr::Msr(sys, rs) => {
                    let value = self.reg_read(rs);
                    self.sysregs.insert(sys, value);
                }
                Instr::Nop => {}
            }

            pc = next;
        }

        Ok(ExecOutcome {
            steps,
            stop: StopReason::MaxSteps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Emitter;
    use vex_common::ArchParams;

    fn emitter() -> RecordingEmitter {
        RecordingEmitter::new(ArchParams::default())
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let mut e = emitter();
        let entry = e.cursor();
        e.emit(Instr::MovZ(Reg(16), 40, 0));
        e.emit(Instr::AddI(Reg(16), Reg(16), 2));
        e.emit(Instr::Ret);

        let outcome = e.execute(entry, 16).unwrap();
        assert_eq!(outcome.stop, StopReason::Returned);
        assert_eq!(e.gpr(Reg(16)), 42);
    }

    #[test]
    fn test_forward_label_branch() {
        let mut e = emitter();
        let entry = e.cursor();
        let skip = e.new_label();
        e.emit(Instr::MovZ(Reg(16), 1, 0));
        e.emit(Instr::Cbnz(Reg(16), Target::Label(skip)));
        e.emit(Instr::MovZ(Reg(16), 99, 0));
        e.bind_label(skip).unwrap();
        e.emit(Instr::Ret);

        e.execute(entry, 16).unwrap();
        assert_eq!(e.gpr(Reg(16)), 1);
    }

    #[test]
    fn test_call_and_return() {
        let mut e = emitter();
        // Callee first.
        let callee = e.cursor();
        e.emit(Instr::MovZ(Reg(17), 7, 0));
        e.emit(Instr::Ret);
        // Caller branches with link, then doubles the result.
        let entry = e.cursor();
        e.emit(Instr::Bl(Target::Addr(callee)));
        e.emit(Instr::Add(Reg(17), Reg(17), Reg(17)));
        e.emit(Instr::Ret);

        let outcome = e.execute(entry, 32).unwrap();
        assert_eq!(outcome.stop, StopReason::Returned);
        assert_eq!(e.gpr(Reg(17)), 14);
    }

    #[test]
    fn test_memory_round_trip() {
        let mut e = emitter();
        let entry = e.cursor();
        e.set_gpr(Reg(20), 0x8000_0100);
        e.emit(Instr::MovZ(Reg(16), 0x2222, 0));
        e.emit(Instr::Str(Reg(16), Reg(20), 8));
        e.emit(Instr::Ldr(Reg(17), Reg(20), 8));
        e.emit(Instr::Ret);

        e.execute(entry, 16).unwrap();
        assert_eq!(e.gpr(Reg(17)), 0x2222);
        assert_eq!(e.read_word(0x8000_0108), 0x2222);
    }

    #[test]
    fn test_misaligned_access_is_error() {
        let mut e = emitter();
        let entry = e.cursor();
        e.set_gpr(Reg(20), 0x8000_0101);
        e.emit(Instr::Ldr(Reg(17), Reg(20), 0));
        assert!(e.execute(entry, 4).is_err());
    }

    #[test]
    fn test_eret_stops_execution() {
        let mut e = emitter();
        let entry = e.cursor();
        e.emit(Instr::Eret);
        let outcome = e.execute(entry, 4).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
    }
}
