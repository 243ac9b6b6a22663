//! Privilege-switch / system-call dispatcher
//!
//! The handler entered on a deliberate call into a higher privilege level.
//! An action code arrives in the first argument register and a chain of
//! equality tests selects the requested service: trap-return to the lower
//! level from previously saved context, bulk-load of registers from a data
//! block, or the common skip-and-return tail for everything else.

use log::debug;

use vex_common::{GenResult, RegisterRole, RoleMap};
use vex_emit::{Emitter, Instr, Reg, Target};

use crate::sequencer::{RoutineId, RoutineSequencer};

/// Action code requesting a trap-return to the lower privilege level.
pub const ACTION_LOWER_RETURN: u16 = 1;

/// Action code requesting a bulk register load from a data block.
pub const ACTION_CONTEXT_LOAD: u16 = 2;

/// Generator for the system-call dispatch chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallDispatchGenerator;

impl SyscallDispatchGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Emit the dispatch chain. The `LowerReturn`, `ContextLoad`, and
    /// `SkipInstruction` routines must already be generated in `seq`.
    pub fn generate(
        &self,
        emit: &mut dyn Emitter,
        seq: &RoutineSequencer,
        roles: &RoleMap,
    ) -> GenResult<()> {
        let code = Reg(roles.resolve(RegisterRole::Argument0)?);
        let scratch = Reg(roles.resolve(RegisterRole::Temporary0)?);
        debug!("syscall dispatch chain, action code in {code}");

        let to_lower_return = emit.new_label();
        let to_context_load = emit.new_label();

        emit.emit(Instr::SubI(scratch, code, ACTION_LOWER_RETURN));
        emit.emit(Instr::Cbz(scratch, Target::Label(to_lower_return)));
        emit.emit(Instr::SubI(scratch, code, ACTION_CONTEXT_LOAD));
        emit.emit(Instr::Cbz(scratch, Target::Label(to_context_load)));

        // Unrecognized codes skip the faulting instruction and return.
        seq.jump_to_routine(emit, RoutineId::SkipInstruction, scratch)?;

        emit.bind_label(to_lower_return)?;
        seq.jump_to_routine(emit, RoutineId::LowerReturn, scratch)?;

        emit.bind_label(to_context_load)?;
        seq.jump_to_routine(emit, RoutineId::ContextLoad, scratch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::LevelRoutineSource;
    use crate::stack::{HandlerStack, StackParams};
    use vex_common::{Address, ArchParams, PrivilegeLevel};
    use vex_emit::{RecordingEmitter, StopReason, SysReg};

    fn generate_dispatcher(level: PrivilegeLevel) -> (RecordingEmitter, RoleMap, Address) {
        let arch = ArchParams::default();
        let mut e = RecordingEmitter::new(arch.clone());
        let mut stack = HandlerStack::new(&arch);
        stack
            .generate(
                &mut e,
                StackParams {
                    load_pointer: false,
                    ..StackParams::default()
                },
            )
            .unwrap();
        let roles = RoleMap::standard(&arch).unwrap();
        let mut seq = RoutineSequencer::new(&arch);
        {
            let mut source = LevelRoutineSource::new(level, &roles, &arch, &mut stack);
            seq.generate_routine(&mut e, &mut source, RoutineId::LowerReturn)
                .unwrap();
            seq.generate_routine(&mut e, &mut source, RoutineId::ContextLoad)
                .unwrap();
        }
        let entry = e.cursor();
        SyscallDispatchGenerator::new()
            .generate(&mut e, &seq, &roles)
            .unwrap();
        (e, roles, entry)
    }

    #[test]
    fn test_unknown_code_falls_through_to_skip() {
        let (mut e, roles, entry) = generate_dispatcher(PrivilegeLevel::Pl1);
        let code = Reg(roles.resolve(RegisterRole::Argument0).unwrap());
        e.set_gpr(code, 9);
        e.write_register(SysReg::ReturnAddress(PrivilegeLevel::Pl1), 0x5000);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(PrivilegeLevel::Pl1), None),
            (0x5004, true)
        );
    }

    #[test]
    fn test_lower_return_code_returns_without_skipping() {
        let (mut e, roles, entry) = generate_dispatcher(PrivilegeLevel::Pl1);
        let code = Reg(roles.resolve(RegisterRole::Argument0).unwrap());
        e.set_gpr(code, u64::from(ACTION_LOWER_RETURN));
        e.write_register(SysReg::ReturnAddress(PrivilegeLevel::Pl1), 0x5000);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        // The saved return address is used as-is.
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(PrivilegeLevel::Pl1), None),
            (0x5000, true)
        );
    }

    #[test]
    fn test_context_load_code_reaches_block_load() {
        let (mut e, roles, entry) = generate_dispatcher(PrivilegeLevel::Pl2);
        let code = Reg(roles.resolve(RegisterRole::Argument0).unwrap());
        let block_reg = Reg(roles.resolve(RegisterRole::Argument1).unwrap());
        let block = 0x8900_0000u64;
        e.write_word(block, 0x1234);
        e.set_gpr(code, u64::from(ACTION_CONTEXT_LOAD));
        e.set_gpr(block_reg, block);
        e.write_register(SysReg::ReturnAddress(PrivilegeLevel::Pl2), 0x9000);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        // Slot 0 of the block lands in the first loaded register.
        let t1 = Reg(roles.resolve(RegisterRole::Temporary1).unwrap());
        assert_eq!(e.gpr(t1), 0x1234);
    }
}
