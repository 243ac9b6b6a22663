//! Per-memory-bank handler instance cache
//!
//! At most one instance exists per (handler kind, memory bank); lookups are
//! idempotent and instances live for the run. An instance records the entry
//! address of its generated body per privilege level, since system-register
//! banking makes the bodies level-specific.

use log::trace;
use std::collections::BTreeMap;

use vex_common::{Address, HandlerKind, MemoryBank, PrivilegeLevel};

/// One handler instance: a (kind, bank) pair plus its generated entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInstance {
    kind: HandlerKind,
    bank: MemoryBank,
    entries: BTreeMap<PrivilegeLevel, Address>,
}

impl HandlerInstance {
    fn new(kind: HandlerKind, bank: MemoryBank) -> Self {
        Self {
            kind,
            bank,
            entries: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn bank(&self) -> MemoryBank {
        self.bank
    }

    /// Entry address of this instance's body at a privilege level.
    pub fn entry(&self, level: PrivilegeLevel) -> Option<Address> {
        self.entries.get(&level).copied()
    }

    pub fn has_entry(&self, level: PrivilegeLevel) -> bool {
        self.entries.contains_key(&level)
    }

    pub(crate) fn set_entry(&mut self, level: PrivilegeLevel, entry: Address) {
        self.entries.insert(level, entry);
    }
}

/// Registry owning handler instances, keyed by kind and bank.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    instances: BTreeMap<(HandlerKind, MemoryBank), HandlerInstance>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the instance for (kind, bank), creating it on first request.
    /// A second request for the same key returns the same instance.
    pub fn instance(&mut self, kind: HandlerKind, bank: MemoryBank) -> &mut HandlerInstance {
        self.instances.entry((kind, bank)).or_insert_with(|| {
            trace!("new handler instance {kind}/{bank}");
            HandlerInstance::new(kind, bank)
        })
    }

    /// Look up an existing instance without creating one.
    pub fn get(&self, kind: HandlerKind, bank: MemoryBank) -> Option<&HandlerInstance> {
        self.instances.get(&(kind, bank))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerInstance> {
        self.instances.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_idempotent() {
        let mut registry = HandlerRegistry::new();
        registry
            .instance(HandlerKind::SyscallDispatch, MemoryBank::Default)
            .set_entry(PrivilegeLevel::Pl1, 0x1000);
        // A second request must return the same instance, not a fresh one.
        let again = registry.instance(HandlerKind::SyscallDispatch, MemoryBank::Default);
        assert_eq!(again.entry(PrivilegeLevel::Pl1), Some(0x1000));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_banks_are_distinct_instances() {
        let mut registry = HandlerRegistry::new();
        registry.instance(HandlerKind::TrapRedirect, MemoryBank::Default);
        registry.instance(HandlerKind::TrapRedirect, MemoryBank::Secure);
        assert_eq!(registry.len(), 2);
        assert!(registry
            .get(HandlerKind::TrapRedirect, MemoryBank::Secure)
            .is_some());
        assert!(registry
            .get(HandlerKind::TranslationFault, MemoryBank::Secure)
            .is_none());
    }

    #[test]
    fn test_per_level_entries() {
        let mut registry = HandlerRegistry::new();
        let instance = registry.instance(HandlerKind::SkipInstruction, MemoryBank::Default);
        instance.set_entry(PrivilegeLevel::Pl1, 0x100);
        instance.set_entry(PrivilegeLevel::Pl2, 0x200);
        assert_eq!(instance.entry(PrivilegeLevel::Pl1), Some(0x100));
        assert_eq!(instance.entry(PrivilegeLevel::Pl2), Some(0x200));
        assert!(!instance.has_entry(PrivilegeLevel::Pl3));
    }
}
