//! Error types for eksform.
//!
//! Errors are grouped by the phase that raises them. Configuration errors are
//! always raised before any provider call is made; provisioning errors are
//! raised per unit while a plan is being applied.

use std::path::PathBuf;
use thiserror::Error;

use crate::state::StateError;

/// Result type alias for eksform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for eksform.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A field on a unit holds an invalid value.
    #[error("Invalid value for '{field}' on unit '{unit}': {message}")]
    InvalidField {
        /// Unit the field belongs to
        unit: String,
        /// Offending field
        field: String,
        /// Error message
        message: String,
    },

    /// A unit references a unit that is not declared.
    #[error("Unit '{unit}' references undeclared unit '{target}' via '{field}'")]
    InvalidReference {
        /// Referencing unit
        unit: String,
        /// Field holding the reference
        field: String,
        /// Referenced unit
        target: String,
    },

    /// The unit graph contains a cycle.
    #[error("Dependency cycle detected between units: {}", .units.join(" -> "))]
    DependencyCycle {
        /// Units that form the strongly connected component
        units: Vec<String>,
    },

    /// A malformed or unusable CIDR block.
    #[error("Invalid CIDR block '{value}': {message}")]
    InvalidCidr {
        /// The CIDR as written
        value: String,
        /// Error message
        message: String,
    },

    /// Node group sizing violates `min <= desired <= max`.
    #[error(
        "Invalid sizing for node group '{unit}': min_size={min} desired_size={desired} max_size={max}"
    )]
    InvalidSizing {
        /// Node group unit
        unit: String,
        /// Minimum size
        min: u32,
        /// Desired size
        desired: u32,
        /// Maximum size
        max: u32,
    },

    /// A module pin is malformed or missing.
    #[error("Invalid module pin '{name}': {message}")]
    InvalidModulePin {
        /// Catalog name of the module
        name: String,
        /// Error message
        message: String,
    },

    /// Two units share the same id.
    #[error("Duplicate unit id '{0}'")]
    DuplicateUnit(String),

    /// The access entry map leaves the cluster without an administrator.
    #[error(
        "Cluster '{cluster}' would be unmanageable after creation: no principal in the access entry map holds a cluster-admin policy"
    )]
    Lockout {
        /// Cluster name
        cluster: String,
    },

    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// A required output was read before its producer completed.
    #[error("Unit '{unit}' cannot resolve '{target}.{output}' for '{field}': producer has not completed")]
    UnresolvedReference {
        /// Consuming unit
        unit: String,
        /// Field holding the reference
        field: String,
        /// Producing unit
        target: String,
        /// Output name
        output: String,
    },

    // ========================================================================
    // Provisioning Errors
    // ========================================================================
    /// The provider rejected an operation.
    #[error("Provider failed to {operation} unit '{unit}': {message}")]
    ProviderFailed {
        /// Unit being reconciled
        unit: String,
        /// Operation (create, update, delete)
        operation: String,
        /// Error message
        message: String,
    },

    /// A provider operation exceeded its timeout.
    #[error("Operation '{operation}' on unit '{unit}' timed out after {timeout_secs} seconds")]
    OperationTimeout {
        /// Unit being reconciled
        unit: String,
        /// Operation (create, update, delete)
        operation: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// The run was cancelled before the unit started.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Persisted state could not be read or written.
    #[error("State error: {0}")]
    State(#[from] StateError),

    // ========================================================================
    // Configuration Loading Errors
    // ========================================================================
    /// Error loading the stack file.
    #[error("Failed to load stack from '{path}': {message}")]
    StackLoad {
        /// Path to the stack file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Invalid `-e key=value` override.
    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    /// Tool configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new invalid field error.
    pub fn invalid_field(
        unit: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            unit: unit.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid reference error.
    pub fn invalid_reference(
        unit: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::InvalidReference {
            unit: unit.into(),
            field: field.into(),
            target: target.into(),
        }
    }

    /// Creates a new invalid CIDR error.
    pub fn invalid_cidr(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCidr {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates a new provider failure error.
    pub fn provider_failed(
        unit: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderFailed {
            unit: unit.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors detected before any mutation is attempted.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidField { .. }
                | Error::InvalidReference { .. }
                | Error::DependencyCycle { .. }
                | Error::InvalidCidr { .. }
                | Error::InvalidSizing { .. }
                | Error::InvalidModulePin { .. }
                | Error::DuplicateUnit(_)
                | Error::Lockout { .. }
                | Error::StackLoad { .. }
                | Error::InvalidOverride(_)
        )
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::OperationTimeout { .. } | Error::ProviderFailed { .. } | Error::Cancelled
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProviderFailed { .. } | Error::OperationTimeout { .. } => 2,
            Error::Lockout { .. } => 5,
            Error::State(_) => 6,
            Error::Cancelled => 130,
            e if e.is_configuration_error() => 4,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_exit_before_mutation() {
        let err = Error::InvalidSizing {
            unit: "node_group".into(),
            min: 3,
            desired: 2,
            max: 5,
        };
        assert!(err.is_configuration_error());
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_lockout_has_distinct_exit_code() {
        let err = Error::Lockout {
            cluster: "acme-prod-eks".into(),
        };
        assert!(err.is_configuration_error());
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_cycle_message_lists_units() {
        let err = Error::DependencyCycle {
            units: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected between units: a -> b");
    }

    #[test]
    fn test_error_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = res.context("reading state").unwrap_err();
        assert_eq!(err.to_string(), "reading state");
    }
}
