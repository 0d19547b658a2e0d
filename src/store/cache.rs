//! Non-authenticated local cache
//!
//! Small key/value byte cache for the stand-alone passkey wallet: it remembers
//! which credential handle to assert and whether a wallet was created. Nothing
//! stored here is secret.

use std::path::PathBuf;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Cache key under which the passkey wallet stores its handle
pub const SIGPASS_CACHE_KEY: &str = "sigpass";

/// Cache key of the "passkey wallet exists" marker
pub const SIGPASS_STATUS_KEY: &str = "SIGPASS_STATUS";

/// Key/value byte cache holding credential handles and markers
pub trait HandleCache: std::fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether a value is stored under `key`
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// One file per key under a cache directory
#[derive(Debug, Clone)]
pub struct FileHandleCache {
    dir: PathBuf,
}

impl FileHandleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Internal(format!("Invalid cache key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.bin", key)))
    }
}

impl HandleCache for FileHandleCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, value)?;
        debug!("Cached {} bytes under '{}'", value.len(), key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process cache
#[derive(Debug, Default)]
pub struct MemoryHandleCache {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryHandleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HandleCache for MemoryHandleCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
