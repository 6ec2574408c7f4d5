//! Watermark stores.
//!
//! A store maps a watermark's qualified name to its latest persisted value.
//! `save` merges with whatever is already stored, so a stored value never
//! moves backwards even if an older copy is saved late.
//!
//! Implementations:
//! - `MemoryHwmStore`: process local, for tests and one-shot runs
//! - `JsonFileHwmStore`: one JSON document per watermark in a directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::hwm::{FileHwm, HwmKind};

/// Errors raised by a watermark store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on watermark file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed watermark file '{}': {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Saving a value of another kind under an existing name
    #[error("Watermark '{name}' is stored as '{stored}', cannot save a '{given}' value")]
    KindMismatch {
        name: String,
        stored: HwmKind,
        given: HwmKind,
    },

    /// Failure reported by an external store backend
    #[error("{0}")]
    Backend(String),
}

/// Persistence for watermarks.
pub trait HwmStore: Send + Sync {
    /// Latest saved value for the name, if any.
    fn get(&self, qualified_name: &str) -> Result<Option<FileHwm>, StoreError>;

    /// Persist a watermark, merging with the stored value.
    fn save(&self, hwm: &FileHwm) -> Result<(), StoreError>;

    /// Short name for logs.
    fn store_type(&self) -> &'static str;
}

/// Merge `hwm` into `stored`, or take `hwm` as is when nothing is stored.
fn merged(stored: Option<FileHwm>, hwm: &FileHwm) -> Result<FileHwm, StoreError> {
    match stored {
        None => Ok(hwm.clone()),
        Some(mut current) => {
            if current.kind() != hwm.kind() {
                return Err(StoreError::KindMismatch {
                    name: hwm.qualified_name(),
                    stored: current.kind(),
                    given: hwm.kind(),
                });
            }
            current.merge(hwm);
            Ok(current)
        }
    }
}

/// Watermarks kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryHwmStore {
    data: Mutex<HashMap<String, FileHwm>>,
}

impl MemoryHwmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HwmStore for MemoryHwmStore {
    fn get(&self, qualified_name: &str) -> Result<Option<FileHwm>, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(qualified_name).cloned())
    }

    fn save(&self, hwm: &FileHwm) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let name = hwm.qualified_name();
        let value = merged(data.get(&name).cloned(), hwm)?;
        data.insert(name, value);
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

/// On-disk document of `JsonFileHwmStore`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredHwm {
    qualified_name: String,
    hwm: FileHwm,
    saved_at: DateTime<Utc>,
}

/// Watermarks stored as JSON files in a directory.
///
/// The file name is the SHA-256 of the qualified name, which keeps names with
/// slashes and colons out of the filesystem. Writes go to a temp file that is
/// renamed over the target, so a crash mid-write leaves the old value intact.
#[derive(Debug)]
pub struct JsonFileHwmStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileHwmStore {
    /// Open a store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(JsonFileHwmStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the watermark with the given name.
    pub fn file_path(&self, qualified_name: &str) -> PathBuf {
        let digest = Sha256::digest(qualified_name.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    fn read(&self, path: &Path) -> Result<Option<FileHwm>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let stored: StoredHwm =
            serde_json::from_str(&content).map_err(|source| StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded watermark '{}' from {}", stored.qualified_name, path.display());
        Ok(Some(stored.hwm))
    }

    fn write(&self, path: &Path, hwm: FileHwm) -> Result<(), StoreError> {
        let document = StoredHwm {
            qualified_name: hwm.qualified_name(),
            hwm,
            saved_at: Utc::now(),
        };
        let json =
            serde_json::to_string_pretty(&document).map_err(|source| StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json).map_err(|source| StoreError::Io {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl HwmStore for JsonFileHwmStore {
    fn get(&self, qualified_name: &str) -> Result<Option<FileHwm>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read(&self.file_path(qualified_name))
    }

    fn save(&self, hwm: &FileHwm) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let name = hwm.qualified_name();
        let path = self.file_path(&name);
        let value = merged(self.read(&path)?, hwm)?;
        debug!("Saving watermark '{}' to {}", name, path.display());
        self.write(&path, value)
    }

    fn store_type(&self) -> &'static str {
        "json"
    }
}
