//! Vex Test Generator - Common Types and Utilities
//!
//! This crate contains the classification axes, architecture parameters,
//! register roles, configuration types, and error definitions shared across
//! all components of the handler generation framework.

pub mod arch;
pub mod axes;
pub mod config;
pub mod error;
pub mod roles;

pub use arch::{ArchParams, IndexField, TranslationGeometry};
pub use axes::{FaultClass, HandlerKind, HandlerSet, MemoryBank, PrivilegeLevel, SecurityState};
pub use config::GeneratorConfig;
pub use error::{GenError, GenResult};
pub use roles::{RegisterRole, RoleMap};

/// Generic address into the target's physical address space.
pub type Address = u64;

/// Identifier of an emitted instruction record.
pub type RecordId = u64;

/// Label identifier for forward-branch resolution.
pub type LabelId = u32;
