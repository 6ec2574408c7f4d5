//! Transfer orchestration shared by the downloader and the uploader.
//!
//! Both directions run the same protocol:
//! - resolve every candidate to a (source, destination, temp) triple up front
//! - process the candidates one by one, isolating per-file failures
//! - bucket each candidate into exactly one of the four result sets
//!
//! The direction specific I/O is behind the `TransferBackend` trait.

use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, FsError, Result};
use crate::model::{FailedFile, FileEntry, FileWriteMode, PathStat, TransferItem};
use crate::path::PathLike;
use crate::progress::{FileOutcome, ProgressCallback, TransferSummary};
use crate::result::TransferResult;

/// Options of a transfer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// How to handle files that already exist at the destination
    pub mode: FileWriteMode,

    /// Remove each source file once it was transferred
    pub delete_source: bool,
}

impl TransferOptions {
    pub fn with_mode(mut self, mode: FileWriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_delete_source(mut self, delete_source: bool) -> Self {
        self.delete_source = delete_source;
        self
    }
}

/// Direction specific I/O of a transfer.
pub(crate) trait TransferBackend<S: PathLike, D: PathLike> {
    /// Stat a source file. `Ok(None)` if nothing exists at `path`.
    fn source_file(&self, path: &S) -> Result<Option<FileEntry<S>>>;

    fn destination_exists(&self, path: &D) -> Result<bool>;

    /// Copy `source` to `target`. Returns the size of the written file.
    fn transfer(&self, source: &FileEntry<S>, target: &D, replace: bool) -> Result<u64>;

    /// Move a staged file over `target`, replacing it if present.
    fn promote(&self, staged: &D, target: &D) -> Result<()>;

    fn remove_source(&self, source: &FileEntry<S>) -> Result<()>;

    /// Called after a file reached its destination, before the source is
    /// removed. An error here fails the file.
    fn commit(&mut self, _source: &FileEntry<S>) -> Result<()> {
        Ok(())
    }

    /// Called after a file failed.
    fn file_failed(&mut self, _source: &S) {}
}

/// Name of the per-run staging directory.
pub(crate) fn temp_dir_name() -> String {
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), Uuid::new_v4().simple())
}

/// Compute the (source, destination, temp) triple of every candidate.
///
/// Explicit paths are interpreted against `source_root`:
/// - absolute and strictly below the root: the relative part is kept
/// - relative: joined to the root
/// - absolute with no root configured: flat, only the file name is kept
///
/// Duplicates (after normalization) are dropped, first occurrence wins.
/// Nothing is touched before every candidate resolved.
///
/// # Errors
/// - `EngineError::PathMismatch` for a path outside the root, including a
///   relative path whose `..` components climb above it
/// - `EngineError::RelativePathWithoutSource` for a relative path without root
/// - `EngineError::DestinationConflict` when two different sources map to
///   the same destination (same file name in flat mode)
pub(crate) fn resolve_items<S: PathLike, D: PathLike>(
    files: impl IntoIterator<Item = S>,
    source_root: Option<&S>,
    destination_root: &D,
    temp_root: Option<&D>,
) -> Result<Vec<TransferItem<S, D>>> {
    let mut seen = HashSet::new();
    let mut destinations: HashMap<D, S> = HashMap::new();
    let mut items = Vec::new();

    for file in files {
        let (source, relative) = match source_root {
            Some(root) if file.is_absolute() => match file.strip_parent(root) {
                Some(relative) => (file, relative),
                None => {
                    return Err(EngineError::PathMismatch {
                        path: file.to_string(),
                        root: root.to_string(),
                    })
                }
            },
            Some(root) => {
                let source = root.join_relative(&file.to_posix_string());
                match source.strip_parent(root) {
                    Some(relative) => (source, relative),
                    None => {
                        return Err(EngineError::PathMismatch {
                            path: file.to_string(),
                            root: root.to_string(),
                        })
                    }
                }
            }
            None if file.is_absolute() => match file.file_name() {
                Some(name) => (file, name),
                None => {
                    return Err(FsError::NotAFile {
                        path: file.to_string(),
                    }
                    .into())
                }
            },
            None => {
                return Err(EngineError::RelativePathWithoutSource {
                    path: file.to_string(),
                })
            }
        };

        if !seen.insert(source.clone()) {
            continue;
        }
        let destination = destination_root.join_relative(&relative);
        if let Some(first) = destinations.get(&destination) {
            return Err(EngineError::DestinationConflict {
                destination: destination.to_string(),
                first: first.to_string(),
                second: source.to_string(),
            });
        }
        destinations.insert(destination.clone(), source.clone());
        items.push(TransferItem {
            temp: temp_root.map(|temp| temp.join_relative(&relative)),
            destination,
            source,
        });
    }

    Ok(items)
}

enum Settled<S, D> {
    Successful { destination: D, bytes: u64 },
    Skipped(FileEntry<S>),
    Missing,
}

/// Process all items in order and collect the outcomes.
pub(crate) fn process_items<S, D, B>(
    name: &str,
    backend: &mut B,
    items: &[TransferItem<S, D>],
    options: &TransferOptions,
    progress: Option<&dyn ProgressCallback>,
) -> TransferResult<S, D>
where
    S: PathLike,
    D: PathLike,
    B: TransferBackend<S, D>,
{
    let total = items.len();
    let mut result = TransferResult::new();
    let mut summary = TransferSummary::default();

    info!("|{}| Starting the transfer of {} files", name, total);
    if let Some(callback) = progress {
        callback.on_run_started(total);
    }

    for (index, item) in items.iter().enumerate() {
        info!("|{}| Transferring file {} of {}: {}", name, index + 1, total, item);
        if let Some(callback) = progress {
            callback.on_file_started(index, total, &item.source, &item.destination);
        }

        let mut entry = FileEntry::file(item.source.clone(), PathStat::default());
        let outcome = match process_item(backend, item, options, &mut entry) {
            Ok(Settled::Successful { destination, bytes }) => {
                result.successful.insert(destination);
                FileOutcome::Successful { bytes }
            }
            Ok(Settled::Skipped(source)) => {
                result.skipped.insert(source);
                FileOutcome::Skipped
            }
            Ok(Settled::Missing) => {
                result.missing.insert(item.source.clone());
                FileOutcome::Missing
            }
            Err(e) => {
                error!("|{}| Couldn't transfer file '{}': {}", name, item.source, e);
                backend.file_failed(&item.source);
                let failed = FailedFile::new(entry, e);
                let outcome = FileOutcome::Failed(failed.error.clone());
                result.failed.insert(failed);
                outcome
            }
        };

        summary.record(&outcome);
        if let Some(callback) = progress {
            callback.on_file_completed(index, &item.source, &outcome);
        }
    }

    if let Some(callback) = progress {
        callback.on_run_completed(&summary);
    }
    result
}

/// Per-file protocol. `entry` is filled in as soon as the source is known,
/// so a failure can be reported with its metadata.
fn process_item<S, D, B>(
    backend: &mut B,
    item: &TransferItem<S, D>,
    options: &TransferOptions,
    entry: &mut FileEntry<S>,
) -> Result<Settled<S, D>>
where
    S: PathLike,
    D: PathLike,
    B: TransferBackend<S, D>,
{
    let source = match backend.source_file(&item.source)? {
        Some(source) => source,
        None => {
            warn!("Missing file '{}', skipping", item.source);
            return Ok(Settled::Missing);
        }
    };
    *entry = source.clone();

    let mut replace = false;
    if backend.destination_exists(&item.destination)? {
        match options.mode {
            FileWriteMode::Error => {
                return Err(EngineError::AlreadyExists {
                    path: item.destination.to_string(),
                })
            }
            FileWriteMode::Ignore => {
                warn!("File '{}' already exists, skipping", item.destination);
                return Ok(Settled::Skipped(source));
            }
            FileWriteMode::Overwrite | FileWriteMode::DeleteAll => replace = true,
        }
    }

    let bytes = match &item.temp {
        Some(temp) => {
            // The destination is only touched once the new content is complete
            let bytes = backend.transfer(&source, temp, true)?;
            if replace {
                warn!("File '{}' already exists, overwriting", item.destination);
            }
            backend.promote(temp, &item.destination)?;
            bytes
        }
        None => backend.transfer(&source, &item.destination, replace)?,
    };

    backend.commit(&source)?;

    if options.delete_source {
        backend.remove_source(&source)?;
    }

    Ok(Settled::Successful {
        destination: item.destination.clone(),
        bytes,
    })
}
