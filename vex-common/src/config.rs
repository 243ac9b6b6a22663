//! Generator configuration surface
//!
//! Owned by the surrounding layer and passed in; the framework only selects
//! behavior from it and never interprets the values further.

use serde::{Deserialize, Serialize};

fn default_handler_set() -> String {
    "Comprehensive".to_string()
}

fn default_delegation_weight() -> u32 {
    50
}

/// Configuration consumed by the exception handler manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Name of the handler set to load ("Comprehensive" or "Fast").
    #[serde(default = "default_handler_set")]
    pub handler_set: String,

    /// Suppress handler generation entirely; vector bases still initialize.
    #[serde(default)]
    pub suppress_handlers: bool,

    /// Exception-delegation weighting in percent. At or above the midpoint
    /// the redirector delegates traps below the top privilege level.
    #[serde(default = "default_delegation_weight")]
    pub delegation_weight: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            handler_set: default_handler_set(),
            suppress_handlers: false,
            delegation_weight: default_delegation_weight(),
        }
    }
}

impl GeneratorConfig {
    /// Whether the redirector should delegate traps downward.
    pub fn delegation_enabled(&self) -> bool {
        self.delegation_weight >= 50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.handler_set, "Comprehensive");
        assert!(!config.suppress_handlers);
        assert!(config.delegation_enabled());
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"handler_set": "Fast"}"#).unwrap();
        assert_eq!(config.handler_set, "Fast");
        assert_eq!(config.delegation_weight, 50);
    }
}
