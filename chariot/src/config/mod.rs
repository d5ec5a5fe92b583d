//! Configuration types and parsing for the Chariot runtime

use crate::runtime::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum nesting of function calls before evaluation fails
    pub max_call_depth: usize,
    /// Bound of the debugger's event queue
    pub debug_event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            debug_event_capacity: crate::debugger::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> RuntimeResult<Self> {
        toml::from_str(source).map_err(|e| RuntimeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("max_call_depth = 64").unwrap();
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.debug_event_capacity, 100);
    }

    #[test]
    fn malformed_document_is_config_error() {
        let err = RuntimeConfig::from_toml_str("max_call_depth = \"deep\"").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
