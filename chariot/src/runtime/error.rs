// Error handling for the Chariot runtime

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime errors that can occur during Chariot execution
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Wrong argument kind at a builtin boundary
    #[error("{function}: {message}")]
    ArgumentError { function: String, message: String },

    /// Wrong number of arguments
    #[error("arity mismatch calling '{function}': expected {expected}, got {actual}")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("property '{property}' not found in {target}")]
    UnknownProperty { property: String, target: String },

    #[error("{kind} '{name}' not defined")]
    UndefinedName { kind: String, name: String },

    #[error("type mismatch in {operation}: expected {expected}, got {actual}")]
    TypeError {
        expected: String,
        actual: String,
        operation: String,
    },

    /// A plan step raised; the remaining steps of that run were skipped
    #[error("plan '{plan}' step {step} failed: {source}")]
    StepFailure {
        plan: String,
        step: usize,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("call depth exceeded limit of {limit}")]
    RecursionLimit { limit: usize },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn argument(function: &str, message: impl Into<String>) -> Self {
        RuntimeError::ArgumentError {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn undefined_variable(name: &str) -> Self {
        RuntimeError::UndefinedName {
            kind: "variable".to_string(),
            name: name.to_string(),
        }
    }

    pub fn undefined_function(name: &str) -> Self {
        RuntimeError::UndefinedName {
            kind: "function".to_string(),
            name: name.to_string(),
        }
    }

    pub fn type_error(expected: &str, actual: &str, operation: &str) -> Self {
        RuntimeError::TypeError {
            expected: expected.to_string(),
            actual: actual.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Stable category name used in logs and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::ArgumentError { .. } | RuntimeError::ArityMismatch { .. } => {
                "ArgumentError"
            }
            RuntimeError::UnknownProperty { .. } => "UnknownPropertyError",
            RuntimeError::UndefinedName { .. } => "UndefinedNameError",
            RuntimeError::TypeError { .. } => "TypeError",
            RuntimeError::StepFailure { .. } => "StepFailureError",
            RuntimeError::InvalidProgram(_) => "InvalidProgram",
            RuntimeError::RecursionLimit { .. } => "RecursionLimit",
            RuntimeError::Persistence(_) => "PersistenceError",
            RuntimeError::Config(_) => "ConfigError",
            RuntimeError::Internal(_) => "InternalError",
        }
    }
}

/// Maps a poisoned lock into a runtime error.
pub fn lock_poisoned<E: std::fmt::Display>(err: E) -> RuntimeError {
    RuntimeError::Internal(format!("RwLock poisoned: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failure_keeps_source_chain() {
        let err = RuntimeError::StepFailure {
            plan: "T".to_string(),
            step: 1,
            source: Box::new(RuntimeError::undefined_variable("x")),
        };
        assert_eq!(err.kind(), "StepFailureError");
        assert_eq!(
            err.to_string(),
            "plan 'T' step 1 failed: variable 'x' not defined"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("variable 'x' not defined"));
    }

    #[test]
    fn arity_mismatch_is_an_argument_error() {
        let err = RuntimeError::ArityMismatch {
            function: "f".to_string(),
            expected: "2".to_string(),
            actual: 1,
        };
        assert_eq!(err.kind(), "ArgumentError");
    }
}
