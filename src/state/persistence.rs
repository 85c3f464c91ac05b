//! State Persistence Backends
//!
//! - **JSON**: one state file, written atomically (temp file + rename), with
//!   the previous version kept as `<file>.backup`
//! - **Memory**: in-process storage for tests and dry runs
//!
//! Both backends implement the `StatePersistence` trait.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::{StateError, StateRecord, StateResult, STATE_FORMAT_VERSION};

/// Persistence backend type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceBackend {
    /// JSON state file
    Json(PathBuf),
    /// In-memory storage (for testing)
    Memory,
}

/// Trait for state persistence implementations
pub trait StatePersistence: Send + Sync {
    /// Load the state, `None` when nothing has been written yet
    fn load(&self) -> StateResult<Option<StateRecord>>;

    /// Replace the stored state
    fn save(&self, state: &StateRecord) -> StateResult<()>;

    /// Human readable location
    fn location(&self) -> String;
}

// ============================================================================
// JSON Persistence Backend
// ============================================================================

/// JSON file-based persistence backend
#[derive(Debug)]
pub struct JsonPersistence {
    path: PathBuf,
    keep_backup: bool,
}

impl JsonPersistence {
    /// Create a backend for `path`, creating the parent directory
    pub fn new(path: PathBuf) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            keep_backup: true,
        })
    }

    /// Enable or disable the `.backup` copy
    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the previous state copy
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl StatePersistence for JsonPersistence {
    fn load(&self) -> StateResult<Option<StateRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let state: StateRecord = serde_json::from_reader(reader)?;

        if state.version != STATE_FORMAT_VERSION {
            return Err(StateError::VersionMismatch {
                found: state.version,
                expected: STATE_FORMAT_VERSION,
            });
        }
        Ok(Some(state))
    }

    fn save(&self, state: &StateRecord) -> StateResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(self.directory())?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        if self.keep_backup && self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        temp.persist(&self.path)
            .map_err(|e| StateError::Persistence(format!("{}: {}", self.path.display(), e)))?;
        debug!("Wrote state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// Memory Persistence Backend
// ============================================================================

/// In-memory persistence backend (for testing)
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: RwLock<Option<StateRecord>>,
}

impl MemoryPersistence {
    /// Create a new in-memory persistence backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state
    pub fn with_state(state: StateRecord) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }
}

impl StatePersistence for MemoryPersistence {
    fn load(&self) -> StateResult<Option<StateRecord>> {
        Ok(self.state.read().clone())
    }

    fn save(&self, state: &StateRecord) -> StateResult<()> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
