//! Core data model for transfers.
//!
//! This module defines the value types passed between the pipeline stages:
//! - PathStat, FileEntry: a path plus the metadata a listing returned
//! - FailedFile: a file entry with the error that stopped its transfer
//! - FileWriteMode: how to handle files that already exist at the destination
//! - TransferItem: the (source, destination, temp) triple of one candidate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::EngineError;
use crate::path::{LocalPath, PathLike, RemotePath};
use crate::result::format_size;

/// Metadata of a file or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time, if the backend reports one
    pub mtime: Option<DateTime<Utc>>,
}

impl PathStat {
    pub fn new(size: u64, mtime: Option<DateTime<Utc>>) -> Self {
        PathStat { size, mtime }
    }

    /// Build from local filesystem metadata.
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        PathStat {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// A listed path together with its metadata.
///
/// Equality, hashing and ordering only look at the path, so a set of entries
/// behaves like a set of paths.
#[derive(Debug, Clone)]
pub struct FileEntry<P> {
    pub path: P,
    pub stat: PathStat,
    pub kind: EntryKind,
}

/// An entry on a file connection.
pub type RemoteFile = FileEntry<RemotePath>;

/// An entry on the local filesystem.
pub type LocalFile = FileEntry<LocalPath>;

impl<P> FileEntry<P> {
    pub fn file(path: P, stat: PathStat) -> Self {
        FileEntry {
            path,
            stat,
            kind: EntryKind::File,
        }
    }

    pub fn directory(path: P, stat: PathStat) -> Self {
        FileEntry {
            path,
            stat,
            kind: EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

impl<P: PartialEq> PartialEq for FileEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<P: Eq> Eq for FileEntry<P> {}

impl<P: Hash> Hash for FileEntry<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl<P: Ord> PartialOrd for FileEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord> Ord for FileEntry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl<P: fmt::Display> fmt::Display for FileEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Directory => write!(f, "'{}' (directory)", self.path),
            EntryKind::File => write!(f, "'{}' (size='{}')", self.path, format_size(self.stat.size)),
        }
    }
}

/// A file whose transfer failed, with the captured error.
#[derive(Debug, Clone)]
pub struct FailedFile<P> {
    pub entry: FileEntry<P>,
    pub error: Arc<EngineError>,
}

impl<P> FailedFile<P> {
    pub fn new(entry: FileEntry<P>, error: EngineError) -> Self {
        FailedFile {
            entry,
            error: Arc::new(error),
        }
    }

    pub fn path(&self) -> &P {
        &self.entry.path
    }
}

impl<P: PartialEq> PartialEq for FailedFile<P> {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
    }
}

impl<P: Eq> Eq for FailedFile<P> {}

impl<P: Hash> Hash for FailedFile<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.hash(state);
    }
}

impl<P: fmt::Display> fmt::Display for FailedFile<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entry, self.error)
    }
}

/// How to handle a file that already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileWriteMode {
    /// Leave the existing file alone and mark the source as failed
    #[default]
    Error,
    /// Leave the existing file alone and mark the source as skipped
    Ignore,
    /// Replace the existing file once the new content is staged
    Overwrite,
    /// Wipe the destination root before the first transfer
    DeleteAll,
}

impl FileWriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileWriteMode::Error => "error",
            FileWriteMode::Ignore => "ignore",
            FileWriteMode::Overwrite => "overwrite",
            FileWriteMode::DeleteAll => "delete_all",
        }
    }
}

impl fmt::Display for FileWriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileWriteMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(FileWriteMode::Error),
            "ignore" => Ok(FileWriteMode::Ignore),
            "overwrite" => Ok(FileWriteMode::Overwrite),
            "delete_all" | "delete-all" => Ok(FileWriteMode::DeleteAll),
            other => Err(EngineError::InvalidOption {
                option: "mode",
                reason: format!(
                    "unknown write mode '{}', expected one of: error, ignore, overwrite, delete_all",
                    other
                ),
            }),
        }
    }
}

/// Source, destination and optional staging path of one candidate.
///
/// Computed once before any I/O. A temp path must live on the same
/// filesystem as the destination for the final move to be an atomic rename;
/// the engine cannot verify mount topology, so this is on the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem<S, D> {
    pub source: S,
    pub destination: D,
    pub temp: Option<D>,
}

impl<S: PathLike, D: PathLike> fmt::Display for TransferItem<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.temp {
            Some(temp) => write!(
                f,
                "from = '{}', temp = '{}', to = '{}'",
                self.source, temp, self.destination
            ),
            None => write!(f, "from = '{}', to = '{}'", self.source, self.destination),
        }
    }
}
