//! Abstract register roles
//!
//! Generators never name concrete register indices. They request registers
//! by role and a per-generation `RoleMap` resolves the role to an index,
//! which keeps the subroutine library privilege-level-agnostic: the same
//! walker body can be generated at Pl1 and Pl2 with disjoint scratch sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::arch::ArchParams;
use crate::error::{GenError, GenResult};

/// Abstract role a generator can request a register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegisterRole {
    /// First and second call/action-code arguments.
    Argument0,
    Argument1,
    /// Free scratch, clobbered without saving.
    Temporary0,
    Temporary1,
    Temporary2,
    /// Holds the privilege level a handler runs at.
    PrivLevelValue,
    /// Holds the exception-class value read from the syndrome register.
    EcValue,
    /// Scratch that must be preserved across a subroutine.
    CalleeSaved0,
    CalleeSaved1,
    /// Walker input: faulting address.
    FaultAddress,
    /// Walker input: translation-table base.
    TableBase,
    /// Walker output: address of the located descriptor.
    DescriptorAddr,
    /// Walker output: value of the located descriptor.
    DescriptorValue,
    /// Walker output: level the walk stopped at.
    WalkLevel,
}

impl RegisterRole {
    /// All roles a standard role map assigns, in assignment order.
    pub const ALL: [RegisterRole; 14] = [
        RegisterRole::Argument0,
        RegisterRole::Argument1,
        RegisterRole::Temporary0,
        RegisterRole::Temporary1,
        RegisterRole::Temporary2,
        RegisterRole::PrivLevelValue,
        RegisterRole::EcValue,
        RegisterRole::CalleeSaved0,
        RegisterRole::CalleeSaved1,
        RegisterRole::FaultAddress,
        RegisterRole::TableBase,
        RegisterRole::DescriptorAddr,
        RegisterRole::DescriptorValue,
        RegisterRole::WalkLevel,
    ];

    /// Roles a subroutine must leave unchanged unless they are its outputs.
    pub fn is_callee_saved(self) -> bool {
        matches!(self, RegisterRole::CalleeSaved0 | RegisterRole::CalleeSaved1)
    }
}

impl fmt::Display for RegisterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-generation resolution of roles to concrete register indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    assignments: BTreeMap<RegisterRole, u8>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard map from the architecture's scratch pool, one
    /// register per role in pool order.
    pub fn standard(arch: &ArchParams) -> GenResult<Self> {
        let mut assignments = BTreeMap::new();
        let mut pool = arch.scratch_registers.iter().copied();
        for role in RegisterRole::ALL {
            let reg = pool.next().ok_or_else(|| GenError::NoFreeRegister {
                purpose: role.to_string(),
            })?;
            assignments.insert(role, reg);
        }
        Ok(Self { assignments })
    }

    /// Assign or reassign a single role.
    pub fn assign(&mut self, role: RegisterRole, register: u8) {
        self.assignments.insert(role, register);
    }

    /// Resolve a role to its register index.
    pub fn resolve(&self, role: RegisterRole) -> GenResult<u8> {
        self.assignments
            .get(&role)
            .copied()
            .ok_or_else(|| GenError::RoleUnassigned {
                role: role.to_string(),
            })
    }

    /// Iterate over (role, register) assignments.
    pub fn iter(&self) -> impl Iterator<Item = (RegisterRole, u8)> + '_ {
        self.assignments.iter().map(|(role, reg)| (*role, *reg))
    }
}
