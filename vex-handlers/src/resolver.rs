//! Declarative handler assignment
//!
//! A handler set is a JSON document mapping (fault class, optional
//! subclass) keys to (module, class) values, scoped to privilege levels,
//! security states, and optionally a memory bank. The table is loaded once
//! per set name; resolution must yield exactly one assignment per queried
//! combination, and anything else is a fatal configuration error.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use vex_common::{
    FaultClass, GenError, GenResult, HandlerKind, HandlerSet, MemoryBank, PrivilegeLevel,
    SecurityState,
};

/// One entry of an assignment document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEntry {
    pub fault: FaultClass,
    #[serde(default)]
    pub subclass: Option<String>,
    pub privilege: Vec<PrivilegeLevel>,
    pub security: Vec<SecurityState>,
    #[serde(default)]
    pub bank: Option<MemoryBank>,
    pub module: String,
    pub class: String,
}

impl AssignmentEntry {
    fn matches(
        &self,
        fault: FaultClass,
        subclass: Option<&str>,
        privilege: PrivilegeLevel,
        security: SecurityState,
    ) -> bool {
        // A bank-scoped entry only applies in the bank backing the queried
        // security state.
        let bank_ok = match self.bank {
            Some(bank) => bank == MemoryBank::for_security_state(security),
            None => true,
        };
        self.fault == fault
            && self.subclass.as_deref() == subclass
            && self.privilege.contains(&privilege)
            && self.security.contains(&security)
            && bank_ok
    }
}

#[derive(Debug, Deserialize)]
struct AssignmentDocument {
    name: String,
    assignments: Vec<AssignmentEntry>,
}

/// A resolved assignment: the handler to construct and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerAssignment {
    pub module: String,
    pub kind: HandlerKind,
    pub bank: Option<MemoryBank>,
}

/// The loaded (fault class x privilege x security state) -> handler mapping
/// for one handler set.
#[derive(Debug, Clone)]
pub struct AssignmentTable {
    set: HandlerSet,
    entries: Vec<(AssignmentEntry, HandlerKind)>,
}

impl AssignmentTable {
    /// Load the built-in document for a handler set.
    pub fn load(set: HandlerSet) -> GenResult<Self> {
        let document = match set {
            HandlerSet::Comprehensive => include_str!("../data/comprehensive.json"),
            HandlerSet::Fast => include_str!("../data/fast.json"),
        };
        let table = Self::from_json(set.name(), document)?;
        info!(
            "loaded handler set '{}' with {} assignments",
            set.name(),
            table.entries.len()
        );
        Ok(table)
    }

    /// Parse an assignment document. `context` names the source in errors.
    /// Handler classes are resolved to kinds here, so an unconstructible
    /// class is reported at load with its module and class names.
    pub fn from_json(context: &str, json: &str) -> GenResult<Self> {
        let doc: AssignmentDocument =
            serde_json::from_str(json).map_err(|err| GenError::AssignmentParse {
                set: context.to_string(),
                message: err.to_string(),
            })?;
        let set = HandlerSet::from_name(&doc.name)?;
        let mut entries = Vec::with_capacity(doc.assignments.len());
        for entry in doc.assignments {
            let kind = HandlerKind::from_class_name(&entry.module, &entry.class)?;
            entries.push((entry, kind));
        }
        Ok(Self { set, entries })
    }

    pub fn set(&self) -> HandlerSet {
        self.set
    }

    pub fn entries(&self) -> impl Iterator<Item = &AssignmentEntry> {
        self.entries.iter().map(|(entry, _)| entry)
    }

    fn find(
        &self,
        fault: FaultClass,
        subclass: Option<&str>,
        privilege: PrivilegeLevel,
        security: SecurityState,
    ) -> GenResult<Option<HandlerAssignment>> {
        let mut hit: Option<&(AssignmentEntry, HandlerKind)> = None;
        for candidate in &self.entries {
            if !candidate.0.matches(fault, subclass, privilege, security) {
                continue;
            }
            if let Some(previous) = hit {
                return Err(GenError::AmbiguousAssignment {
                    set: self.set.name().to_string(),
                    fault: fault.to_string(),
                    privilege: privilege.to_string(),
                    security: security.to_string(),
                    first: format!("{}::{}", previous.0.module, previous.0.class),
                    second: format!("{}::{}", candidate.0.module, candidate.0.class),
                });
            }
            hit = Some(candidate);
        }
        Ok(hit.map(|(entry, kind)| HandlerAssignment {
            module: entry.module.clone(),
            kind: *kind,
            bank: entry.bank,
        }))
    }

    /// Resolve one (fault, subclass, privilege, security) combination to
    /// its handler. A subclass query falls back to the fault-class-wide
    /// entry when no subclass-specific one exists.
    pub fn resolve(
        &self,
        fault: FaultClass,
        subclass: Option<&str>,
        privilege: PrivilegeLevel,
        security: SecurityState,
    ) -> GenResult<HandlerAssignment> {
        let mut hit = self.find(fault, subclass, privilege, security)?;
        if hit.is_none() && subclass.is_some() {
            debug!("no entry for {fault}/{}, falling back", subclass.unwrap_or(""));
            hit = self.find(fault, None, privilege, security)?;
        }
        hit.ok_or_else(|| GenError::UnresolvedAssignment {
            set: self.set.name().to_string(),
            fault: fault.to_string(),
            privilege: privilege.to_string(),
            security: security.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_sets_load() {
        let comprehensive = AssignmentTable::load(HandlerSet::Comprehensive).unwrap();
        assert_eq!(comprehensive.set(), HandlerSet::Comprehensive);
        let fast = AssignmentTable::load(HandlerSet::Fast).unwrap();
        assert_eq!(fast.set(), HandlerSet::Fast);
    }

    #[test]
    fn test_every_combination_resolves_exactly_once() {
        for set in [HandlerSet::Comprehensive, HandlerSet::Fast] {
            let table = AssignmentTable::load(set).unwrap();
            for fault in FaultClass::ALL {
                for privilege in PrivilegeLevel::ALL {
                    for security in SecurityState::ALL {
                        // resolve() already errors on zero or multiple
                        // matches, so a successful return is the property.
                        table.resolve(fault, None, privilege, security).unwrap();
                    }
                }
            }
        }
    }

    #[test]
    fn test_subclass_overrides_and_falls_back() {
        let table = AssignmentTable::load(HandlerSet::Comprehensive).unwrap();
        let external = table
            .resolve(
                FaultClass::DataAbort,
                Some("External"),
                PrivilegeLevel::Pl1,
                SecurityState::NonSecure,
            )
            .unwrap();
        assert_eq!(external.kind, HandlerKind::DefaultFallback);

        let unknown_subclass = table
            .resolve(
                FaultClass::DataAbort,
                Some("NoSuchSubclass"),
                PrivilegeLevel::Pl1,
                SecurityState::NonSecure,
            )
            .unwrap();
        assert_eq!(unknown_subclass.kind, HandlerKind::TranslationFault);
    }

    #[test]
    fn test_bank_scoped_entry_only_matches_its_bank() {
        let doc = r#"{
            "name": "Fast",
            "assignments": [
                {"fault": "SystemCall", "privilege": ["Pl1"],
                 "security": ["Secure", "NonSecure"], "bank": "Secure",
                 "module": "dispatch", "class": "SyscallDispatch"},
                {"fault": "SystemCall", "privilege": ["Pl1"],
                 "security": ["NonSecure"],
                 "module": "core", "class": "DefaultFallback"}
            ]
        }"#;
        let table = AssignmentTable::from_json("test", doc).unwrap();
        let secure = table
            .resolve(
                FaultClass::SystemCall,
                None,
                PrivilegeLevel::Pl1,
                SecurityState::Secure,
            )
            .unwrap();
        assert_eq!(secure.kind, HandlerKind::SyscallDispatch);

        // The secure-bank entry is out of scope here, so the non-secure
        // query lands on the other entry instead of being ambiguous.
        let non_secure = table
            .resolve(
                FaultClass::SystemCall,
                None,
                PrivilegeLevel::Pl1,
                SecurityState::NonSecure,
            )
            .unwrap();
        assert_eq!(non_secure.kind, HandlerKind::DefaultFallback);
    }

    #[test]
    fn test_ambiguous_assignment_is_fatal() {
        let doc = r#"{
            "name": "Fast",
            "assignments": [
                {"fault": "SystemCall", "privilege": ["Pl1"], "security": ["Secure"],
                 "module": "a", "class": "SyscallDispatch"},
                {"fault": "SystemCall", "privilege": ["Pl1"], "security": ["Secure"],
                 "module": "b", "class": "DefaultFallback"}
            ]
        }"#;
        let table = AssignmentTable::from_json("test", doc).unwrap();
        let err = table
            .resolve(
                FaultClass::SystemCall,
                None,
                PrivilegeLevel::Pl1,
                SecurityState::Secure,
            )
            .unwrap_err();
        assert!(matches!(err, GenError::AmbiguousAssignment { .. }));
    }

    #[test]
    fn test_unresolved_assignment_is_fatal() {
        let doc = r#"{
            "name": "Fast",
            "assignments": [
                {"fault": "SystemCall", "privilege": ["Pl1"], "security": ["Secure"],
                 "module": "a", "class": "SyscallDispatch"}
            ]
        }"#;
        let table = AssignmentTable::from_json("test", doc).unwrap();
        let err = table
            .resolve(
                FaultClass::DataAbort,
                None,
                PrivilegeLevel::Pl1,
                SecurityState::Secure,
            )
            .unwrap_err();
        assert!(matches!(err, GenError::UnresolvedAssignment { .. }));
    }

    #[test]
    fn test_unknown_class_reported_with_context() {
        let doc = r#"{
            "name": "Fast",
            "assignments": [
                {"fault": "SystemCall", "privilege": ["Pl1"], "security": ["Secure"],
                 "module": "dispatch", "class": "NoSuchHandler"}
            ]
        }"#;
        let err = AssignmentTable::from_json("test", doc).unwrap_err();
        assert_eq!(
            err,
            GenError::UnknownHandlerClass {
                module: "dispatch".to_string(),
                class: "NoSuchHandler".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        let err = AssignmentTable::from_json("test", "{not json").unwrap_err();
        assert!(matches!(err, GenError::AssignmentParse { .. }));
    }
}
