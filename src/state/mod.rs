//! Recorded state.
//!
//! The state file holds one record per applied unit: what was declared, what
//! it resolved to, what the provider returned, and which units it depended on
//! at the time. Plans diff against it; destroy orders itself from it.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 StateManager                  │
//! │   (single writer, persists after each unit)   │
//! └──────────────────────────────────────────────┘
//!            │                         │
//!            ▼                         ▼
//! ┌────────────────────┐    ┌────────────────────┐
//! │    Persistence     │    │    Diff Engine     │
//! │  (JSON / memory)   │    │ (attribute diffs)  │
//! └────────────────────┘    └────────────────────┘
//! ```

pub mod diff;
pub mod persistence;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::graph::{OutputMap, Outputs, Unit, UnitId, UnitKind};
use crate::sources::ModulePin;

pub use diff::{AttributeChange, ChangeType, DiffEngine, StateDiff};
pub use persistence::{JsonPersistence, MemoryPersistence, PersistenceBackend, StatePersistence};

/// Current on-disk format
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Errors that can occur while reading or writing state
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State persistence error: {0}")]
    Persistence(String),

    #[error("No recorded state for unit: {0}")]
    NotFound(String),

    #[error("Unsupported state format version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// What was applied for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub kind: UnitKind,
    pub module: ModulePin,
    /// Fingerprint of the declaration that was applied
    pub fingerprint: String,
    /// Symbolic attribute tree, references as `${unit.output}`
    pub declared: Value,
    /// Attributes after reference resolution, as sent to the provider
    pub resolved: OutputMap,
    /// Provider outputs
    pub outputs: OutputMap,
    /// Producers this unit depended on when applied
    pub dependencies: Vec<UnitId>,
    /// Whether destroy must call the provider
    pub destructible: bool,
    pub updated_at: DateTime<Utc>,
}

impl UnitRecord {
    /// Record a successfully applied unit
    pub fn new(unit: &Unit, resolved: OutputMap, outputs: OutputMap, dependencies: Vec<UnitId>) -> Self {
        Self {
            id: unit.id.clone(),
            kind: unit.kind,
            module: unit.module.clone(),
            fingerprint: unit.fingerprint(),
            declared: unit.declared(),
            resolved,
            outputs,
            dependencies,
            destructible: unit.kind.is_destructible(),
            updated_at: Utc::now(),
        }
    }
}

/// The whole state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Stable identifier of this state's history
    pub lineage: String,
    pub updated_at: DateTime<Utc>,
    pub units: IndexMap<UnitId, UnitRecord>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRecord {
    /// An empty state with a fresh lineage
    pub fn new() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
            units: IndexMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&UnitRecord> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    /// Insert or replace a unit record
    pub fn upsert(&mut self, record: UnitRecord) {
        self.units.insert(record.id.clone(), record);
        self.touch();
    }

    /// Remove a unit, keeping the order of the others
    pub fn remove(&mut self, id: &str) -> Option<UnitRecord> {
        let removed = self.units.shift_remove(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Recorded outputs of every unit, for resolving references
    pub fn outputs(&self) -> Outputs {
        self.units
            .values()
            .map(|r| (r.id.clone(), r.outputs.clone()))
            .collect()
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }
}

/// Owns the state and its backend. Every mutation is persisted before it
/// returns, behind a single lock.
pub struct StateManager {
    persistence: Box<dyn StatePersistence>,
    current: Mutex<StateRecord>,
}

impl StateManager {
    /// Open the state at `backend`, starting empty when none exists
    pub fn open(backend: PersistenceBackend) -> StateResult<Self> {
        let persistence: Box<dyn StatePersistence> = match backend {
            PersistenceBackend::Json(path) => Box::new(JsonPersistence::new(path)?),
            PersistenceBackend::Memory => Box::new(MemoryPersistence::new()),
        };
        Self::with_persistence(persistence)
    }

    pub fn with_persistence(persistence: Box<dyn StatePersistence>) -> StateResult<Self> {
        let current = match persistence.load()? {
            Some(state) => {
                debug!(
                    "Loaded state serial {} with {} units from {}",
                    state.serial,
                    state.len(),
                    persistence.location()
                );
                state
            }
            None => StateRecord::new(),
        };
        Ok(Self {
            persistence,
            current: Mutex::new(current),
        })
    }

    /// A copy of the current state
    pub fn snapshot(&self) -> StateRecord {
        self.current.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<UnitRecord> {
        self.current.lock().get(id).cloned()
    }

    /// Record an applied unit and persist
    pub fn record(&self, record: UnitRecord) -> StateResult<()> {
        let mut state = self.current.lock();
        state.upsert(record);
        self.persistence.save(&state)
    }

    /// Drop a unit from state and persist
    pub fn remove(&self, id: &str) -> StateResult<UnitRecord> {
        let mut state = self.current.lock();
        let removed = state
            .remove(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        self.persistence.save(&state)?;
        Ok(removed)
    }

    /// Where the state lives, for messages
    pub fn location(&self) -> String {
        self.persistence.location()
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("location", &self.persistence.location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{names, ModuleCatalog};

    fn record(id: &str) -> UnitRecord {
        let unit = Unit::new(
            id,
            UnitKind::Vpc,
            ModuleCatalog::defaults().get(names::VPC).unwrap().clone(),
        )
        .attr("name", "vpc");
        let mut outputs = OutputMap::new();
        outputs.insert("vpc_id".into(), Value::String("vpc-123".into()));
        UnitRecord::new(&unit, OutputMap::new(), outputs, vec![])
    }

    #[test]
    fn test_upsert_bumps_serial() {
        let mut state = StateRecord::new();
        state.upsert(record("vpc"));
        state.upsert(record("vpc"));
        assert_eq!(state.serial, 2);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut state = StateRecord::new();
        state.upsert(record("a"));
        state.upsert(record("b"));
        state.upsert(record("c"));
        state.remove("b");
        let ids: Vec<&str> = state.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_outputs_from_state() {
        let mut state = StateRecord::new();
        state.upsert(record("vpc"));
        let outputs = state.outputs();
        assert_eq!(outputs.get("vpc").unwrap()["vpc_id"], Value::String("vpc-123".into()));
    }

    #[test]
    fn test_manager_persists_each_mutation() {
        let manager = StateManager::open(PersistenceBackend::Memory).unwrap();
        manager.record(record("vpc")).unwrap();
        assert!(manager.get("vpc").is_some());
        manager.remove("vpc").unwrap();
        assert!(matches!(manager.remove("vpc"), Err(StateError::NotFound(_))));
        assert!(manager.snapshot().is_empty());
    }
}
