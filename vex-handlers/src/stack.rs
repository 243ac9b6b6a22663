//! Register-preservation stack
//!
//! A full-descending stack used by generated handler code to save and
//! restore registers across subroutine calls. The pointer register is
//! claimed exclusively from the emission service and every push/pop is
//! emitted through it, so generated paths and their callers agree on layout
//! by construction.
//!
//! There is no bounds checking: a pop on an empty stack or a mismatched
//! frame call is a bug in the generated path's author, not a runtime
//! condition. `debug_assert!` documents the frame-pairing contract.

use log::{debug, trace};

use vex_common::{Address, ArchParams, GenError, GenResult, MemoryBank};
use vex_emit::{materialize_imm, Emitter, Instr, MemKind, Reg, ReserveKind};

/// Default backing-store size in bytes when no memory is supplied.
const DEFAULT_STACK_BYTES: u64 = 4096;

/// Parameters for [`HandlerStack::generate`]. Unset fields are chosen by
/// the stack: memory is allocated, the top defaults to the end of the
/// backing store, and the pointer register is picked from the scratch pool.
#[derive(Debug, Clone)]
pub struct StackParams {
    pub memory: Option<Address>,
    pub top: Option<Address>,
    pub pointer: Option<Reg>,
    pub load_pointer: bool,
    pub bank: MemoryBank,
}

impl Default for StackParams {
    fn default() -> Self {
        Self {
            memory: None,
            top: None,
            pointer: None,
            load_pointer: true,
            bank: MemoryBank::Default,
        }
    }
}

/// Register-preservation stack with frame discipline.
#[derive(Debug)]
pub struct HandlerStack {
    word_size: u64,
    link: Reg,
    scratch_pool: Vec<u8>,
    pointer: Option<Reg>,
    top: Address,
    frames: Vec<Vec<Reg>>,
}

impl HandlerStack {
    pub fn new(arch: &ArchParams) -> Self {
        Self {
            word_size: arch.word_size,
            link: Reg(arch.link_register),
            scratch_pool: arch.scratch_registers.clone(),
            pointer: None,
            top: 0,
            frames: Vec::new(),
        }
    }

    /// Whether `generate` has run.
    pub fn is_generated(&self) -> bool {
        self.pointer.is_some()
    }

    /// The claimed pointer register.
    pub fn pointer(&self) -> GenResult<Reg> {
        self.pointer.ok_or_else(|| GenError::InvalidState {
            message: "handler stack used before generation".to_string(),
        })
    }

    /// Initial top-of-stack address.
    pub fn top(&self) -> Address {
        self.top
    }

    /// Accept or allocate backing memory, claim a pointer register, and
    /// optionally emit the code loading the pointer with the initial top.
    /// Returns the chosen register.
    pub fn generate(&mut self, emit: &mut dyn Emitter, params: StackParams) -> GenResult<Reg> {
        if self.pointer.is_some() {
            return Err(GenError::InvalidState {
                message: "handler stack generated twice".to_string(),
            });
        }

        let memory = match params.memory {
            Some(addr) => addr,
            None => emit.allocate_memory(
                DEFAULT_STACK_BYTES,
                self.word_size,
                MemKind::Stack,
                params.bank,
            )?,
        };
        let top = params.top.unwrap_or(memory + DEFAULT_STACK_BYTES);

        let pointer = match params.pointer {
            Some(reg) => {
                emit.reserve_register(reg, ReserveKind::ReadWrite)?;
                reg
            }
            None => self.claim_pointer(emit)?,
        };

        debug!("handler stack: pointer {pointer}, top {top:#x}");
        if params.load_pointer {
            materialize_imm(emit, pointer, top);
        }

        self.pointer = Some(pointer);
        self.top = top;
        Ok(pointer)
    }

    fn claim_pointer(&self, emit: &mut dyn Emitter) -> GenResult<Reg> {
        for &index in self.scratch_pool.iter().rev() {
            let reg = Reg(index);
            if emit.reserve_register(reg, ReserveKind::ReadWrite).is_ok() {
                return Ok(reg);
            }
        }
        Err(GenError::NoFreeRegister {
            purpose: "stack pointer".to_string(),
        })
    }

    /// Push a register: decrement the pointer by one word, then store.
    pub fn push(&mut self, emit: &mut dyn Emitter, reg: Reg) -> GenResult<()> {
        let sp = self.pointer()?;
        trace!("push {reg}");
        emit.emit(Instr::SubI(sp, sp, self.word_size as u16));
        emit.emit(Instr::Str(reg, sp, 0));
        Ok(())
    }

    /// Pop into a register: load, then increment the pointer by one word.
    pub fn pop(&mut self, emit: &mut dyn Emitter, reg: Reg) -> GenResult<()> {
        let sp = self.pointer()?;
        trace!("pop {reg}");
        emit.emit(Instr::Ldr(reg, sp, 0));
        emit.emit(Instr::AddI(sp, sp, self.word_size as u16));
        Ok(())
    }

    /// Non-destructive read at `sp + offset` words; offset 0 is the top.
    pub fn peek(&mut self, emit: &mut dyn Emitter, reg: Reg, offset: u64) -> GenResult<()> {
        let sp = self.pointer()?;
        emit.emit(Instr::Ldr(reg, sp, (offset * self.word_size) as i16));
        Ok(())
    }

    /// Non-destructive write at `sp + offset` words; offset 0 is the top.
    pub fn modify(&mut self, emit: &mut dyn Emitter, reg: Reg, offset: u64) -> GenResult<()> {
        let sp = self.pointer()?;
        emit.emit(Instr::Str(reg, sp, (offset * self.word_size) as i16));
        Ok(())
    }

    /// Open a frame: push the link register first, then `regs` in reverse
    /// order, leaving `regs[0]` on top. Frame layout from the top:
    /// `regs[0], regs[1], .., link`.
    pub fn new_stack_frame(&mut self, emit: &mut dyn Emitter, regs: &[Reg]) -> GenResult<()> {
        debug!("frame open: {} registers + link", regs.len());
        self.push(emit, self.link)?;
        for &reg in regs.iter().rev() {
            self.push(emit, reg)?;
        }
        self.frames.push(regs.to_vec());
        Ok(())
    }

    /// Close the top frame: pop the saved registers in reverse of the order
    /// listed, then the link register last. Must pair 1:1 with the matching
    /// `new_stack_frame`.
    pub fn free_stack_frame(&mut self, emit: &mut dyn Emitter) -> GenResult<()> {
        debug_assert!(!self.frames.is_empty(), "free_stack_frame without a frame");
        let regs = self.frames.pop().unwrap_or_default();
        debug!("frame close: {} registers + link", regs.len());
        for &reg in regs.iter() {
            self.pop(emit, reg)?;
        }
        self.pop(emit, self.link)?;
        Ok(())
    }

    /// Number of instructions `free_stack_frame` will emit for the current
    /// top frame. Callers use this to pre-compute branch distances.
    pub fn frame_instruction_count(&self) -> u64 {
        match self.frames.last() {
            Some(regs) => 2 * (regs.len() as u64 + 1),
            None => 0,
        }
    }

    /// Depth of currently open frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}
