//! Transfer results.
//!
//! `FileSet` is an insertion-ordered set. `TransferResult` holds four of
//! them, one per outcome, and every candidate of a run lands in exactly one.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::error::{EngineError, Result};
use crate::model::{FailedFile, FileEntry};
use crate::path::{LocalPath, PathLike, RemotePath};

/// Format a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Insertion-ordered set.
///
/// Iteration follows insertion order; equality ignores it.
#[derive(Debug, Clone)]
pub struct FileSet<T> {
    items: Vec<T>,
    index: HashSet<T>,
}

impl<T> Default for FileSet<T> {
    fn default() -> Self {
        FileSet {
            items: Vec::new(),
            index: HashSet::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> FileSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. Returns false if an equal item was already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.index.contains(&item) {
            return false;
        }
        self.index.insert(item.clone());
        self.items.push(item);
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<P> FileSet<FileEntry<P>> {
    /// Sum of the entry sizes.
    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|entry| entry.stat.size).sum()
    }
}

impl<P> FileSet<FailedFile<P>> {
    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|failed| failed.entry.stat.size).sum()
    }
}

impl<T: Eq + Hash> PartialEq for FileSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T: Eq + Hash> Eq for FileSet<T> {}

impl<T: Clone + Eq + Hash> FromIterator<T> for FileSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = FileSet::new();
        set.extend(iter);
        set
    }
}

impl<T: Clone + Eq + Hash> Extend<T> for FileSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

impl<T> IntoIterator for FileSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a FileSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Display> fmt::Display for FileSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return write!(f, "No files");
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "    {}", item)?;
        }
        Ok(())
    }
}

/// Outcome of a transfer run, bucketed by what happened to each candidate.
///
/// `successful` holds destination paths. The other buckets hold source
/// references: `failed` with the captured error, `skipped` when the write
/// mode avoided a conflict, `missing` when the source vanished between
/// enumeration and transfer.
#[derive(Debug, Clone)]
pub struct TransferResult<S: PathLike, D: PathLike> {
    pub successful: FileSet<D>,
    pub failed: FileSet<FailedFile<S>>,
    pub skipped: FileSet<FileEntry<S>>,
    pub missing: FileSet<S>,
}

/// Result of `FileDownloader::run`.
pub type DownloadResult = TransferResult<RemotePath, LocalPath>;

/// Result of `FileUploader::run`.
pub type UploadResult = TransferResult<LocalPath, RemotePath>;

impl<S: PathLike, D: PathLike> Default for TransferResult<S, D> {
    fn default() -> Self {
        TransferResult {
            successful: FileSet::new(),
            failed: FileSet::new(),
            skipped: FileSet::new(),
            missing: FileSet::new(),
        }
    }
}

impl<S: PathLike, D: PathLike> TransferResult<S, D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries over all buckets.
    pub fn total_count(&self) -> usize {
        self.successful.len() + self.failed.len() + self.skipped.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// True if nothing failed and nothing went missing.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }

    /// Turn failed entries into an error.
    pub fn raise_if_failed(&self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        Err(EngineError::ResultCheck(format!(
            "Failed {} files (size='{}'):\n{}",
            self.failed.len(),
            format_size(self.failed.total_size()),
            self.failed
        )))
    }

    /// Turn missing entries into an error.
    pub fn raise_if_missing(&self) -> Result<()> {
        if self.missing.is_empty() {
            return Ok(());
        }
        Err(EngineError::ResultCheck(format!(
            "Missing {} files:\n{}",
            self.missing.len(),
            self.missing
        )))
    }

    /// Turn skipped entries into an error.
    pub fn raise_if_skipped(&self) -> Result<()> {
        if self.skipped.is_empty() {
            return Ok(());
        }
        Err(EngineError::ResultCheck(format!(
            "Skipped {} files (size='{}'):\n{}",
            self.skipped.len(),
            format_size(self.skipped.total_size()),
            self.skipped
        )))
    }

    /// Fail if the run did not touch a single file.
    pub fn raise_if_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(EngineError::ResultCheck("There are no files in the result".to_string()));
        }
        Ok(())
    }

    /// One-line count summary.
    pub fn summary(&self) -> String {
        format!(
            "{} successful, {} failed, {} skipped, {} missing",
            self.successful.len(),
            self.failed.len(),
            self.skipped.len(),
            self.missing.len()
        )
    }
}

impl<S: PathLike, D: PathLike> fmt::Display for TransferResult<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Successful {} files:", self.successful.len())?;
        writeln!(f, "{}", self.successful)?;
        writeln!(
            f,
            "Failed {} files (size='{}'):",
            self.failed.len(),
            format_size(self.failed.total_size())
        )?;
        writeln!(f, "{}", self.failed)?;
        writeln!(
            f,
            "Skipped {} files (size='{}'):",
            self.skipped.len(),
            format_size(self.skipped.total_size())
        )?;
        writeln!(f, "{}", self.skipped)?;
        writeln!(f, "Missing {} files:", self.missing.len())?;
        write!(f, "{}", self.missing)
    }
}
