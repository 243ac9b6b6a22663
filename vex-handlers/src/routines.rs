//! Shared routine bodies for one privilege level
//!
//! The routine source ties the sequencer's enumerated ids to concrete body
//! generators. One source exists per (privilege level, generation pass):
//! system registers are banked by level, so the same id generates distinct
//! bodies at Pl1 and Pl2.

use log::debug;

use vex_common::{ArchParams, GenResult, PrivilegeLevel, RegisterRole, RoleMap};
use vex_emit::{Emitter, Instr, Reg, SysReg};

use crate::sequencer::{RoutineId, RoutineSequencer, RoutineSource};
use crate::stack::HandlerStack;
use crate::walker::TableWalkGenerator;

/// Registers bulk-loaded by the `ContextLoad` routine, in block order.
/// `Temporary0` stays out of the set: the skip tail scrambles it on the
/// way back.
const CONTEXT_LOAD_ROLES: [RegisterRole; 4] = [
    RegisterRole::Temporary1,
    RegisterRole::Temporary2,
    RegisterRole::CalleeSaved0,
    RegisterRole::CalleeSaved1,
];

/// Routine source for one privilege level's handler code.
pub struct LevelRoutineSource<'a> {
    level: PrivilegeLevel,
    roles: &'a RoleMap,
    arch: &'a ArchParams,
    stack: &'a mut HandlerStack,
    walker: TableWalkGenerator,
}

impl<'a> LevelRoutineSource<'a> {
    pub fn new(
        level: PrivilegeLevel,
        roles: &'a RoleMap,
        arch: &'a ArchParams,
        stack: &'a mut HandlerStack,
    ) -> Self {
        let walker = TableWalkGenerator::new(arch.translation.clone());
        Self {
            level,
            roles,
            arch,
            stack,
            walker,
        }
    }

    /// Advance the trap return address past the faulting instruction, then
    /// trap-return.
    fn generate_skip(&self, emit: &mut dyn Emitter) -> GenResult<()> {
        let t0 = Reg(self.roles.resolve(RegisterRole::Temporary0)?);
        let ret = SysReg::ReturnAddress(self.level);
        emit.emit(Instr::Mrs(t0, ret));
        emit.emit(Instr::AddI(t0, t0, self.arch.instr_width as u16));
        emit.emit(Instr::Msr(ret, t0));
        emit.emit(Instr::Eret);
        Ok(())
    }

    /// Load the context registers from the data block addressed by the
    /// second argument register, then fall through to the skip tail.
    fn generate_context_load(
        &self,
        emit: &mut dyn Emitter,
        seq: &mut RoutineSequencer,
    ) -> GenResult<()> {
        let block = Reg(self.roles.resolve(RegisterRole::Argument1)?);
        let scratch = Reg(self.roles.resolve(RegisterRole::Argument0)?);
        for (slot, role) in CONTEXT_LOAD_ROLES.iter().enumerate() {
            let reg = Reg(self.roles.resolve(*role)?);
            emit.emit(Instr::Ldr(
                reg,
                block,
                (slot as u64 * self.arch.word_size) as i16,
            ));
        }
        seq.jump_to_routine(emit, RoutineId::SkipInstruction, scratch)
    }
}

impl RoutineSource for LevelRoutineSource<'_> {
    fn prerequisites(&self, id: RoutineId) -> Vec<RoutineId> {
        match id {
            RoutineId::ContextLoad => vec![RoutineId::SkipInstruction],
            RoutineId::TableWalk
            | RoutineId::SkipInstruction
            | RoutineId::LowerReturn => Vec::new(),
        }
    }

    fn generate_body(
        &mut self,
        emit: &mut dyn Emitter,
        seq: &mut RoutineSequencer,
        id: RoutineId,
    ) -> GenResult<()> {
        debug!("generating {id} body for {}", self.level);
        match id {
            RoutineId::TableWalk => self.walker.generate(emit, self.stack, self.roles),
            RoutineId::SkipInstruction => self.generate_skip(emit),
            RoutineId::ContextLoad => self.generate_context_load(emit, seq),
            RoutineId::LowerReturn => {
                // The saved return address and status were captured at trap
                // entry; returning through them is the whole body.
                emit.emit(Instr::Eret);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackParams;
    use vex_emit::{RecordingEmitter, StopReason};

    fn setup() -> (RecordingEmitter, HandlerStack, RoleMap, ArchParams) {
        let arch = ArchParams::default();
        let mut emitter = RecordingEmitter::new(arch.clone());
        let mut stack = HandlerStack::new(&arch);
        stack
            .generate(
                &mut emitter,
                StackParams {
                    load_pointer: false,
                    ..StackParams::default()
                },
            )
            .unwrap();
        let roles = RoleMap::standard(&arch).unwrap();
        (emitter, stack, roles, arch)
    }

    #[test]
    fn test_skip_advances_return_address() {
        let (mut e, mut stack, roles, arch) = setup();
        let mut seq = RoutineSequencer::new(&arch);
        let mut source =
            LevelRoutineSource::new(PrivilegeLevel::Pl1, &roles, &arch, &mut stack);
        let entry = seq
            .generate_routine(&mut e, &mut source, RoutineId::SkipInstruction)
            .unwrap();

        let ret = SysReg::ReturnAddress(PrivilegeLevel::Pl1);
        e.write_register(ret, 0x4000);
        let outcome = e.execute(entry, 16).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        assert_eq!(e.read_register(ret, None), (0x4004, true));
    }

    #[test]
    fn test_context_load_pulls_block_and_skips() {
        let (mut e, mut stack, roles, arch) = setup();
        let mut seq = RoutineSequencer::new(&arch);
        let mut source =
            LevelRoutineSource::new(PrivilegeLevel::Pl2, &roles, &arch, &mut stack);
        let entry = seq
            .generate_routine(&mut e, &mut source, RoutineId::ContextLoad)
            .unwrap();
        assert!(seq.has_generated_routine(RoutineId::SkipInstruction));

        let block = 0x8800_0000u64;
        for slot in 0..CONTEXT_LOAD_ROLES.len() as u64 {
            e.write_word(block + slot * 8, 0x100 + slot);
        }
        let arg1 = Reg(roles.resolve(RegisterRole::Argument1).unwrap());
        e.set_gpr(arg1, block);
        e.write_register(SysReg::ReturnAddress(PrivilegeLevel::Pl2), 0x7000);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        for (slot, role) in CONTEXT_LOAD_ROLES.iter().enumerate() {
            let reg = Reg(roles.resolve(*role).unwrap());
            assert_eq!(e.gpr(reg), 0x100 + slot as u64);
        }
        // Fell through to the skip tail.
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(PrivilegeLevel::Pl2), None),
            (0x7004, true)
        );
    }

    #[test]
    fn test_table_walk_routine_is_callable() {
        let (mut e, mut stack, roles, arch) = setup();
        let mut seq = RoutineSequencer::new(&arch);
        {
            let mut source =
                LevelRoutineSource::new(PrivilegeLevel::Pl1, &roles, &arch, &mut stack);
            seq.generate_routine(&mut e, &mut source, RoutineId::TableWalk)
                .unwrap();
        }

        // A one-level-deep terminal: level 3 descriptor is a block.
        let table = 0x9100_0000u64;
        let fault_addr = 2u64 << 39;
        e.write_word(table + 2 * 8, 0x6000_0001);

        let entry = e.cursor();
        seq.call_routine(&mut e, &mut stack, RoutineId::TableWalk, &[])
            .unwrap();
        e.emit(Instr::Ret);

        let sp = stack.pointer().unwrap();
        e.set_gpr(sp, stack.top());
        e.set_gpr(Reg(roles.resolve(RegisterRole::FaultAddress).unwrap()), fault_addr);
        e.set_gpr(Reg(roles.resolve(RegisterRole::TableBase).unwrap()), table);

        let outcome = e.execute(entry, 256).unwrap();
        assert_eq!(outcome.stop, StopReason::Returned);
        assert_eq!(
            e.gpr(Reg(roles.resolve(RegisterRole::WalkLevel).unwrap())),
            3
        );
        assert_eq!(
            e.gpr(Reg(roles.resolve(RegisterRole::DescriptorValue).unwrap())),
            0x6000_0001
        );
    }
}
