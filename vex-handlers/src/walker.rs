//! Translation-table walker generation
//!
//! Emits code that walks the translation table for a faulting address,
//! level by level, until it finds the faulting or terminal descriptor. The
//! geometry (level count, per-level index fields, descriptor encoding) is an
//! architecture parameter, and every register is requested by role, so the
//! same generator serves any privilege level.

use log::{debug, trace};

use vex_common::{GenResult, RegisterRole, RoleMap, TranslationGeometry};
use vex_emit::{Emitter, Instr, Reg, Target};

use crate::stack::HandlerStack;

/// Generator for the multi-level table-walk routine body.
#[derive(Debug, Clone)]
pub struct TableWalkGenerator {
    geometry: TranslationGeometry,
}

impl TableWalkGenerator {
    pub fn new(geometry: TranslationGeometry) -> Self {
        Self { geometry }
    }

    /// Emit the walk body.
    ///
    /// Inputs: `FaultAddress`, `TableBase`. Outputs: `DescriptorAddr`,
    /// `DescriptorValue`, with the level reached in `WalkLevel`. Working
    /// registers use callee-saved roles pushed before and popped after the
    /// walk, so nothing else is observably changed.
    pub fn generate(
        &self,
        emit: &mut dyn Emitter,
        stack: &mut HandlerStack,
        roles: &RoleMap,
    ) -> GenResult<()> {
        let fault = Reg(roles.resolve(RegisterRole::FaultAddress)?);
        let base = Reg(roles.resolve(RegisterRole::TableBase)?);
        let desc_addr = Reg(roles.resolve(RegisterRole::DescriptorAddr)?);
        let desc_val = Reg(roles.resolve(RegisterRole::DescriptorValue)?);
        let level_reg = Reg(roles.resolve(RegisterRole::WalkLevel)?);
        let table = Reg(roles.resolve(RegisterRole::CalleeSaved0)?);
        let scratch = Reg(roles.resolve(RegisterRole::CalleeSaved1)?);
        let geo = &self.geometry;

        debug!(
            "table walk body: {} levels, fault in {fault}, base in {base}",
            geo.level_count
        );

        stack.push(emit, table)?;
        stack.push(emit, scratch)?;
        emit.emit(Instr::Mov(table, base));

        let done = emit.new_label();
        for level in (0..=geo.start_level()).rev() {
            trace!("walk level {level}");
            let field = geo.index_field(level);
            emit.emit(Instr::MovZ(level_reg, level as u16, 0));

            // Index field of this level, scaled to a byte offset.
            emit.emit(Instr::Lsr(scratch, fault, field.lsb));
            emit.emit(Instr::AndI(scratch, scratch, field.mask()));
            emit.emit(Instr::Lsl(scratch, scratch, geo.descriptor_shift));

            emit.emit(Instr::Add(desc_addr, table, scratch));
            emit.emit(Instr::Ldr(desc_val, desc_addr, 0));

            if level > 0 {
                // Terminal mapping ends the walk here; the final level
                // always terminates, recognized or not.
                emit.emit(Instr::AndI(scratch, desc_val, geo.type_mask));
                emit.emit(Instr::SubI(scratch, scratch, geo.terminal_type as u16));
                emit.emit(Instr::Cbz(scratch, Target::Label(done)));

                // Next-level table base from the descriptor's pointer
                // field, rescaled to a byte address.
                emit.emit(Instr::Lsr(scratch, desc_val, geo.table_field.lsb));
                emit.emit(Instr::AndI(scratch, scratch, geo.table_field.mask()));
                emit.emit(Instr::Lsl(table, scratch, geo.table_field.lsb));
            }
        }
        emit.bind_label(done)?;

        stack.pop(emit, scratch)?;
        stack.pop(emit, table)?;
        emit.emit(Instr::Ret);
        Ok(())
    }
}
