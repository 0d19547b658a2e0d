//! Registry persistence backends
//!
//! The registry needs exactly two operations from its storage: read the whole
//! record, write the whole record. Writing `None` removes it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::types::RegistryState;

/// Storage collaborator of the wallet registry
pub trait RegistryStorage: std::fmt::Debug + Send + Sync {
    /// Read the stored record, `None` if nothing was ever written or it was cleared
    fn read(&self) -> Result<Option<RegistryState>>;

    /// Replace the stored record; `None` removes it
    fn write(&self, state: Option<&RegistryState>) -> Result<()>;
}

/// JSON file backend (`registry.json`)
#[derive(Debug, Clone)]
pub struct FileRegistryStorage {
    path: PathBuf,
}

impl FileRegistryStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStorage for FileRegistryStorage {
    fn read(&self) -> Result<Option<RegistryState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let state = serde_json::from_str::<RegistryState>(&content).map_err(|e| {
            Error::Serialization(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(Some(state))
    }

    fn write(&self, state: Option<&RegistryState>) -> Result<()> {
        let Some(state) = state else {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => {
                    info!("Removed registry {}", self.path.display());
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves half a registry behind
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("Saved {} wallet ids to {}", state.wallet_ids.len(), self.path.display());
        Ok(())
    }
}

/// In-memory backend; keeps the serialized form so reads round-trip through JSON
#[derive(Debug, Default)]
pub struct MemoryRegistryStorage {
    record: Mutex<Option<String>>,
}

impl MemoryRegistryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored JSON, if any
    pub fn raw(&self) -> Result<Option<String>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.record
            .lock()
            .map_err(|_| Error::Internal("Registry storage lock poisoned".to_string()))
    }
}

impl RegistryStorage for MemoryRegistryStorage {
    fn read(&self) -> Result<Option<RegistryState>> {
        match self.lock()?.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn write(&self, state: Option<&RegistryState>) -> Result<()> {
        let json = state.map(serde_json::to_string).transpose()?;
        *self.lock()? = json;
        Ok(())
    }
}
