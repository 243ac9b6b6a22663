//! Classification axes for handler lookup
//!
//! Every handler assignment is keyed by a combination of these finite
//! enumerations: why the trap fired, at which privilege level, in which
//! security state, and against which memory bank. Names here match the
//! spellings used by declarative assignment documents.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GenError;

/// Taxonomy entry identifying why a trap occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FaultClass {
    /// Failed instruction fetch (translation or permission).
    InstructionAbort,
    /// Failed data access (translation or permission).
    DataAbort,
    /// Undefined or disallowed encoding.
    IllegalInstruction,
    /// Deliberate call into a higher privilege level.
    SystemCall,
    /// Misaligned access on an alignment-checked path.
    Alignment,
    /// Debug breakpoint instruction.
    Breakpoint,
    /// Single-step debug trap.
    SoftwareStep,
    /// Asynchronous external interrupt.
    Interrupt,
}

impl FaultClass {
    /// All fault classes, in assignment-document order.
    pub const ALL: [FaultClass; 8] = [
        FaultClass::InstructionAbort,
        FaultClass::DataAbort,
        FaultClass::IllegalInstruction,
        FaultClass::SystemCall,
        FaultClass::Alignment,
        FaultClass::Breakpoint,
        FaultClass::SoftwareStep,
        FaultClass::Interrupt,
    ];

    /// Exception-class code this fault reports in the syndrome register.
    pub fn ec_code(self) -> u16 {
        match self {
            FaultClass::InstructionAbort => 1,
            FaultClass::DataAbort => 2,
            FaultClass::IllegalInstruction => 3,
            FaultClass::SystemCall => 4,
            FaultClass::Alignment => 5,
            FaultClass::Breakpoint => 6,
            FaultClass::SoftwareStep => 7,
            FaultClass::Interrupt => 8,
        }
    }

    /// Parse the spelling used in assignment documents.
    pub fn from_name(name: &str) -> Result<Self, GenError> {
        match name {
            "InstructionAbort" => Ok(FaultClass::InstructionAbort),
            "DataAbort" => Ok(FaultClass::DataAbort),
            "IllegalInstruction" => Ok(FaultClass::IllegalInstruction),
            "SystemCall" => Ok(FaultClass::SystemCall),
            "Alignment" => Ok(FaultClass::Alignment),
            "Breakpoint" => Ok(FaultClass::Breakpoint),
            "SoftwareStep" => Ok(FaultClass::SoftwareStep),
            "Interrupt" => Ok(FaultClass::Interrupt),
            _ => Err(GenError::UnknownFaultClass {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An execution mode with distinct register/state visibility.
///
/// Pl3 is the top level: traps that arrive there cannot be redirected
/// further up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    Pl0,
    Pl1,
    Pl2,
    Pl3,
}

impl PrivilegeLevel {
    pub const ALL: [PrivilegeLevel; 4] = [
        PrivilegeLevel::Pl0,
        PrivilegeLevel::Pl1,
        PrivilegeLevel::Pl2,
        PrivilegeLevel::Pl3,
    ];

    /// The top privilege level.
    pub const TOP: PrivilegeLevel = PrivilegeLevel::Pl3;

    /// Numeric level, 0 = least privileged.
    pub fn number(self) -> u8 {
        match self {
            PrivilegeLevel::Pl0 => 0,
            PrivilegeLevel::Pl1 => 1,
            PrivilegeLevel::Pl2 => 2,
            PrivilegeLevel::Pl3 => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(PrivilegeLevel::Pl0),
            1 => Some(PrivilegeLevel::Pl1),
            2 => Some(PrivilegeLevel::Pl2),
            3 => Some(PrivilegeLevel::Pl3),
            _ => None,
        }
    }

    /// The next level down, None at Pl0.
    pub fn lower(self) -> Option<Self> {
        Self::from_number(self.number().wrapping_sub(1))
    }

    /// Levels that can host handler code (Pl0 never takes traps).
    pub fn handler_levels() -> [PrivilegeLevel; 3] {
        [PrivilegeLevel::Pl1, PrivilegeLevel::Pl2, PrivilegeLevel::Pl3]
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pl{}", self.number())
    }
}

/// Orthogonal execution-mode axis independent of privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityState {
    Secure,
    NonSecure,
}

impl SecurityState {
    pub const ALL: [SecurityState; 2] = [SecurityState::Secure, SecurityState::NonSecure];
}

impl fmt::Display for SecurityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityState::Secure => write!(f, "secure"),
            SecurityState::NonSecure => write!(f, "non-secure"),
        }
    }
}

/// Memory bank handler instances are generated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryBank {
    Default,
    Secure,
}

impl MemoryBank {
    /// Bank backing code and data for a given security state.
    pub fn for_security_state(state: SecurityState) -> Self {
        match state {
            SecurityState::Secure => MemoryBank::Secure,
            SecurityState::NonSecure => MemoryBank::Default,
        }
    }
}

impl fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryBank::Default => write!(f, "default"),
            MemoryBank::Secure => write!(f, "secure"),
        }
    }
}

/// Named policy bundle selecting full vs minimal dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerSet {
    Comprehensive,
    Fast,
}

impl HandlerSet {
    pub fn from_name(name: &str) -> Result<Self, GenError> {
        match name {
            "Comprehensive" => Ok(HandlerSet::Comprehensive),
            "Fast" => Ok(HandlerSet::Fast),
            _ => Err(GenError::UnknownHandlerSet {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandlerSet::Comprehensive => "Comprehensive",
            HandlerSet::Fast => "Fast",
        }
    }
}

/// Enumerated handler classes the registry can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Privilege-switch / system-call dispatcher.
    SyscallDispatch,
    /// Redirects traps taken at the top level to the next level down.
    TrapRedirect,
    /// Walks the translation table to classify a translation fault.
    TranslationFault,
    /// Skips the faulting instruction and returns.
    SkipInstruction,
    /// Catch-all for classes with no dedicated machinery.
    DefaultFallback,
}

impl HandlerKind {
    /// Parse the class spelling used in assignment documents.
    pub fn from_class_name(module: &str, class: &str) -> Result<Self, GenError> {
        match class {
            "SyscallDispatch" => Ok(HandlerKind::SyscallDispatch),
            "TrapRedirect" => Ok(HandlerKind::TrapRedirect),
            "TranslationFault" => Ok(HandlerKind::TranslationFault),
            "SkipInstruction" => Ok(HandlerKind::SkipInstruction),
            "DefaultFallback" => Ok(HandlerKind::DefaultFallback),
            _ => Err(GenError::UnknownHandlerClass {
                module: module.to_string(),
                class: class.to_string(),
            }),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_class_round_trip() {
        for fault in FaultClass::ALL {
            let parsed = FaultClass::from_name(&fault.to_string()).unwrap();
            assert_eq!(parsed, fault);
        }
    }

    #[test]
    fn test_unknown_fault_class_is_error() {
        let err = FaultClass::from_name("NoSuchFault").unwrap_err();
        assert!(matches!(err, GenError::UnknownFaultClass { .. }));
    }

    #[test]
    fn test_privilege_ordering() {
        assert!(PrivilegeLevel::Pl0 < PrivilegeLevel::Pl3);
        assert_eq!(PrivilegeLevel::TOP.lower(), Some(PrivilegeLevel::Pl2));
        assert_eq!(PrivilegeLevel::Pl0.lower(), None);
    }

    #[test]
    fn test_bank_for_security_state() {
        assert_eq!(
            MemoryBank::for_security_state(SecurityState::Secure),
            MemoryBank::Secure
        );
        assert_eq!(
            MemoryBank::for_security_state(SecurityState::NonSecure),
            MemoryBank::Default
        );
    }

    #[test]
    fn test_handler_set_names() {
        assert_eq!(HandlerSet::from_name("Fast").unwrap(), HandlerSet::Fast);
        assert_eq!(HandlerSet::Comprehensive.name(), "Comprehensive");
        assert!(HandlerSet::from_name("Slow").is_err());
    }
}
