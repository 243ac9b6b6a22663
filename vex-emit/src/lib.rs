//! Vex Test Generator - Instruction Model and Emission Service Boundary
//!
//! This crate defines the narrow interface the handler generators use to
//! talk to the surrounding instruction-stream engine:
//!
//! - The instruction and register model (`Instr`, `Reg`, `SysReg`, `Target`)
//! - The `Emitter` trait: emit instructions, read/write registers, reserve
//!   registers, allocate memory, query exception records, resolve branch
//!   offsets
//! - A `RecordingEmitter` implementation backed by a small architectural
//!   model, with an interpreter that executes recorded code so tests can
//!   observe effects instead of instruction text

pub mod emitter;
pub mod instr;
pub mod interp;
pub mod recording;

pub use emitter::{
    imm_instruction_count, materialize_imm, Emitter, HandlerInfoReport, MemKind,
    OffsetResolution, ReserveKind,
};
pub use instr::{Instr, Reg, SysReg, Target, STATUS_PL_LSB, SYNDROME_EC_LSB};
pub use interp::{ExecOutcome, StopReason};
pub use recording::{Record, RecordingEmitter};

pub use vex_common::{Address, LabelId, RecordId};
