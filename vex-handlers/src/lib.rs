//! Vex Test Generator - Exception Handler Code Generation and Dispatch
//!
//! This crate synthesizes privileged-mode handler routines for the
//! instruction set under test: trap entry/exit code, register-preservation
//! stacks, multi-level translation-table walkers, and privilege-level
//! transition code. It behaves as a small retargetable compiler built on the
//! emission service boundary in `vex-emit`:
//!
//! - `HandlerStack` - register-preservation stack with frame discipline
//! - `RoutineSequencer` - generate-once subroutines with prerequisite
//!   resolution and call/jump codegen
//! - `walker` / `dispatch` / `redirect` - the concrete handler generators
//! - `HandlerRegistry` - per-memory-bank cache of handler instances
//! - `AssignmentTable` - the declarative fault/privilege/security mapping
//! - `ExceptionHandlerManager` - top-level orchestrator

pub mod dispatch;
pub mod manager;
pub mod redirect;
pub mod registry;
pub mod resolver;
pub mod routines;
pub mod sequencer;
pub mod stack;
pub mod walker;

pub use dispatch::SyscallDispatchGenerator;
pub use manager::{DispatcherFn, ExceptionHandlerManager, ManagerState, SharedCode};
pub use redirect::TrapRedirectGenerator;
pub use registry::{HandlerInstance, HandlerRegistry};
pub use resolver::{AssignmentEntry, AssignmentTable, HandlerAssignment};
pub use routines::LevelRoutineSource;
pub use sequencer::{RoutineId, RoutineSequencer, RoutineSource};
pub use stack::{HandlerStack, StackParams};
pub use walker::TableWalkGenerator;
