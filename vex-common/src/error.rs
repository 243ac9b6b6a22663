//! Error handling for the handler generation framework
//!
//! Generation is deterministic: every failure is fatal, descriptive, and
//! carries enough identifying context to point at the offending assignment,
//! handler class, or routine. There are no retries and nothing is silently
//! skipped.

use thiserror::Error;

/// Result alias used throughout the framework.
pub type GenResult<T> = Result<T, GenError>;

/// Main error type covering configuration errors, caller invariant
/// violations, and emission-service failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenError {
    #[error("unknown fault class '{name}' in assignment document")]
    UnknownFaultClass { name: String },

    #[error("unknown handler set '{name}'")]
    UnknownHandlerSet { name: String },

    #[error("unknown handler class '{module}::{class}'")]
    UnknownHandlerClass { module: String, class: String },

    #[error("malformed assignment document for set '{set}': {message}")]
    AssignmentParse { set: String, message: String },

    #[error(
        "no handler assignment for {fault}/{privilege}/{security} in set '{set}'"
    )]
    UnresolvedAssignment {
        set: String,
        fault: String,
        privilege: String,
        security: String,
    },

    #[error(
        "ambiguous handler assignment for {fault}/{privilege}/{security} in set '{set}': \
         {first} and {second} both match"
    )]
    AmbiguousAssignment {
        set: String,
        fault: String,
        privilege: String,
        security: String,
        first: String,
        second: String,
    },

    #[error("invalid state: routine {routine} called before it was generated")]
    RoutineNotGenerated { routine: String },

    #[error("prerequisite cycle through routine {routine}")]
    RoutineCycle { routine: String },

    #[error("custom dispatcher registered but handler set '{set}' does not support one")]
    DispatcherNotSupported { set: String },

    #[error("no register assigned to role {role}")]
    RoleUnassigned { role: String },

    #[error("register r{index} is already reserved")]
    RegisterReserved { index: u8 },

    #[error("no unreserved register available for {purpose}")]
    NoFreeRegister { purpose: String },

    #[error("unbound label {label}")]
    UnboundLabel { label: u32 },

    #[error("memory allocation of {size} bytes in bank {bank} failed")]
    AllocationFailed { size: u64, bank: String },

    #[error("generation step out of order: {message}")]
    InvalidState { message: String },
}
