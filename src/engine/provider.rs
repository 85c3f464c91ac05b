//! The provider boundary.
//!
//! The engine never talks to a cloud API directly. Each unit is handed to a
//! [`Provider`] with its attributes already resolved; the provider returns the
//! unit's outputs, which later units read through output references.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::AccessChangeSet;
use crate::graph::{OutputMap, Unit, UnitId, UnitKind};
use crate::sources::ModulePin;
use crate::state::UnitRecord;

/// Errors returned by a provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Throttling, eventual consistency and similar; worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The request itself is wrong; retrying will not help
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Provider operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit with every reference replaced by its producer's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub module: ModulePin,
    pub attributes: OutputMap,
    /// Access entry operations to perform, on the cluster unit only
    pub access_changes: Option<AccessChangeSet>,
}

impl ResolvedUnit {
    pub fn new(unit: &Unit, attributes: OutputMap) -> Self {
        Self {
            id: unit.id.clone(),
            kind: unit.kind,
            module: unit.module.clone(),
            attributes,
            access_changes: None,
        }
    }

    pub fn with_access_changes(mut self, changes: Option<AccessChangeSet>) -> Self {
        self.access_changes = changes;
        self
    }

    /// String attribute, if present
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Creates, updates and deletes units.
///
/// Implementations must be safe to call concurrently for independent units.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Create the unit and return its outputs
    async fn create(&self, unit: &ResolvedUnit) -> ProviderResult<OutputMap>;

    /// Update the unit in place and return its outputs
    async fn update(&self, unit: &ResolvedUnit, previous: &UnitRecord) -> ProviderResult<OutputMap>;

    /// Delete a recorded unit
    async fn delete(&self, record: &UnitRecord) -> ProviderResult<()>;
}
