//! Generate-once subroutine emission
//!
//! Routines are identified by an enumerated id and generated at most once:
//! requesting a routine first generates its transitive prerequisites
//! deepest-first, then emits the routine's own body and records its entry
//! address. Call sites go through `call_routine`/`jump_to_routine`, which
//! handle the stack frame and fall back to an indirect branch when the
//! relative form cannot reach the entry.

use log::{debug, trace};
use std::collections::BTreeMap;
use std::fmt;

use vex_common::{Address, ArchParams, GenError, GenResult};
use vex_emit::{materialize_imm, Emitter, Instr, Reg, Target};

use crate::stack::HandlerStack;

/// Signed offset width of the branch-with-link encoding.
const BRANCH_OFFSET_BITS: u8 = 26;

/// Enumerated identifiers of the shared handler subroutines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoutineId {
    /// Multi-level translation-table walk.
    TableWalk,
    /// Skip the faulting instruction and trap-return.
    SkipInstruction,
    /// Bulk-load registers from a data block, then skip.
    ContextLoad,
    /// Trap-return to a lower privilege level from saved context.
    LowerReturn,
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutineState {
    Generating,
    Generated,
}

#[derive(Debug, Clone, Copy)]
struct RoutineRecord {
    state: RoutineState,
    entry: Address,
}

/// Supplies prerequisite edges and body generators for routine ids.
///
/// `generate_body` receives the sequencer so a body may call or jump to its
/// (already generated) prerequisites.
pub trait RoutineSource {
    fn prerequisites(&self, id: RoutineId) -> Vec<RoutineId>;

    fn generate_body(
        &mut self,
        emit: &mut dyn Emitter,
        seq: &mut RoutineSequencer,
        id: RoutineId,
    ) -> GenResult<()>;
}

/// Generate-once routine registry with prerequisite resolution.
#[derive(Debug)]
pub struct RoutineSequencer {
    routines: BTreeMap<RoutineId, RoutineRecord>,
    link: Reg,
}

impl RoutineSequencer {
    pub fn new(arch: &ArchParams) -> Self {
        Self {
            routines: BTreeMap::new(),
            link: Reg(arch.link_register),
        }
    }

    /// Whether the sequencer knows anything about a routine.
    pub fn has_routine(&self, id: RoutineId) -> bool {
        self.routines.contains_key(&id)
    }

    /// Whether a routine's body has been fully generated.
    pub fn has_generated_routine(&self, id: RoutineId) -> bool {
        matches!(
            self.routines.get(&id),
            Some(RoutineRecord {
                state: RoutineState::Generated,
                ..
            })
        )
    }

    /// Entry address of a generated routine.
    pub fn entry(&self, id: RoutineId) -> Option<Address> {
        match self.routines.get(&id) {
            Some(record) if record.state == RoutineState::Generated => Some(record.entry),
            _ => None,
        }
    }

    /// Generate a routine and its transitive prerequisites, deepest-first,
    /// skipping anything already generated. Every prerequisite reaches the
    /// generated state strictly before the requested routine's own body
    /// begins. Returns the routine's entry address.
    pub fn generate_routine(
        &mut self,
        emit: &mut dyn Emitter,
        source: &mut dyn RoutineSource,
        id: RoutineId,
    ) -> GenResult<Address> {
        if let Some(record) = self.routines.get(&id) {
            match record.state {
                RoutineState::Generated => {
                    trace!("routine {id} already generated");
                    return Ok(record.entry);
                }
                RoutineState::Generating => {
                    return Err(GenError::RoutineCycle {
                        routine: id.to_string(),
                    });
                }
            }
        }

        self.routines.insert(
            id,
            RoutineRecord {
                state: RoutineState::Generating,
                entry: 0,
            },
        );

        for prerequisite in source.prerequisites(id) {
            self.generate_routine(emit, source, prerequisite)?;
        }

        let entry = emit.cursor();
        debug!("routine {id} body at {entry:#x}");
        source.generate_body(emit, self, id)?;

        self.routines.insert(
            id,
            RoutineRecord {
                state: RoutineState::Generated,
                entry,
            },
        );
        Ok(entry)
    }

    fn generated_entry(&self, id: RoutineId) -> GenResult<Address> {
        self.entry(id).ok_or_else(|| GenError::RoutineNotGenerated {
            routine: id.to_string(),
        })
    }

    /// Call a generated routine: open a stack frame over `saved_regs`, emit
    /// a relative branch-with-link to the entry, close the frame. Falls
    /// back to materializing the absolute entry and branching indirectly
    /// when the relative form cannot reach it.
    pub fn call_routine(
        &self,
        emit: &mut dyn Emitter,
        stack: &mut HandlerStack,
        id: RoutineId,
        saved_regs: &[Reg],
    ) -> GenResult<()> {
        let entry = self.generated_entry(id)?;
        stack.new_stack_frame(emit, saved_regs)?;

        let resolution = emit.resolve_offset(emit.cursor(), entry, BRANCH_OFFSET_BITS);
        if resolution.valid {
            emit.emit(Instr::Bl(Target::Addr(entry)));
        } else {
            // The link register is clobbered by the call anyway, so it can
            // carry the absolute target.
            debug!("routine {id} out of relative range, indirect call");
            materialize_imm(emit, self.link, entry);
            emit.emit(Instr::Blr(self.link));
        }

        stack.free_stack_frame(emit)
    }

    /// Branch to a generated routine without linking or framing. `scratch`
    /// carries the absolute target in the long form.
    pub fn jump_to_routine(
        &self,
        emit: &mut dyn Emitter,
        id: RoutineId,
        scratch: Reg,
    ) -> GenResult<()> {
        let entry = self.generated_entry(id)?;
        let resolution = emit.resolve_offset(emit.cursor(), entry, BRANCH_OFFSET_BITS);
        if resolution.valid {
            emit.emit(Instr::B(Target::Addr(entry)));
        } else {
            debug!("routine {id} out of relative range, indirect jump");
            materialize_imm(emit, scratch, entry);
            emit.emit(Instr::Br(scratch));
        }
        Ok(())
    }
}
