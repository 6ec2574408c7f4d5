//! Local filesystem operations.
//!
//! This module provides the low-level operations the transfer engine needs
//! on the machine it runs on:
//! - Enumerating directory trees
//! - Copying files with metadata preservation
//! - Creating directories recursively
//! - Moving staged files into place and clearing directories
//!
//! All functions report `FsError`, so they can back a `FileConnection` as
//! well as the local side of a transfer.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::FsError;
use crate::model::{LocalFile, PathStat};
use crate::path::LocalPath;

/// Enumerate all files below `root`, recursively.
///
/// Directories are descended into but not returned. Symlinks to files are
/// followed, symlinks to directories are skipped, so a link cycle cannot
/// recurse forever. The result is sorted by path, so enumeration order does
/// not depend on the platform.
///
/// # Arguments
/// * `root` - Directory to enumerate
///
/// # Errors
/// Returns FsError if `root` or any directory below it cannot be read.
pub fn enumerate_tree(root: &Path) -> Result<Vec<LocalFile>, FsError> {
    fn recurse(path: &Path, files: &mut Vec<LocalFile>) -> Result<(), FsError> {
        let entries = fs::read_dir(path).map_err(|e| FsError::io(path.display(), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| FsError::io(path.display(), e))?;
            let entry_path = entry.path();
            let metadata = match entry_metadata(&entry_path)
                .map_err(|e| FsError::io(entry_path.display(), e))?
            {
                Some(metadata) => metadata,
                None => continue,
            };

            if metadata.is_dir() {
                recurse(&entry_path, files)?;
            } else {
                files.push(LocalFile::file(
                    LocalPath::from(entry_path),
                    PathStat::from_metadata(&metadata),
                ));
            }
        }
        Ok(())
    }

    let metadata = fs::metadata(root).map_err(|e| FsError::io(root.display(), e))?;
    if !metadata.is_dir() {
        return Err(FsError::NotADirectory {
            path: root.display().to_string(),
        });
    }

    let mut files = Vec::new();
    recurse(root, &mut files)?;
    files.sort();
    Ok(files)
}

/// Metadata of a directory entry, following symlinks to files.
///
/// Returns `Ok(None)` for a symlink pointing at a directory.
pub(crate) fn entry_metadata(path: &Path) -> io::Result<Option<fs::Metadata>> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_symlink() {
        return Ok(Some(metadata));
    }
    let target = fs::metadata(path)?;
    if target.is_dir() {
        tracing::debug!("Skipping directory symlink '{}'", path.display());
        return Ok(None);
    }
    Ok(Some(target))
}

/// Stat a local path that must be a regular file.
///
/// # Errors
/// Returns `FsError::NotFound` if the path does not exist and
/// `FsError::NotAFile` if it is not a regular file.
pub fn local_file(path: &LocalPath) -> Result<LocalFile, FsError> {
    let metadata = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
    if !metadata.is_file() {
        return Err(FsError::NotAFile {
            path: path.to_string(),
        });
    }
    Ok(LocalFile::file(path.clone(), PathStat::from_metadata(&metadata)))
}

/// Copy a file from source to destination with metadata preservation.
///
/// # Arguments
/// * `src` - Source file path
/// * `dst` - Destination file path
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns FsError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, FsError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| FsError::io(src.display(), e))?;
    let src_mtime = src_file
        .metadata()
        .map_err(|e| FsError::io(src.display(), e))?
        .modified()
        .ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| FsError::io(dst.display(), e))?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            FsError::io(dst.display(), e)
        } else {
            FsError::io(src.display(), e)
        }
    })?;
    dst_file.sync_all().map_err(|e| FsError::io(dst.display(), e))?;
    drop(dst_file);

    // Preserve modification time if available
    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns FsError if the parent exists as a file or cannot be created
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), FsError> {
    let parent = match path.parent() {
        // Skip if parent is empty path (relative root)
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(FsError::NotADirectory {
            path: parent.display().to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| FsError::io(parent.display(), e))
        }
        Err(e) => Err(FsError::io(parent.display(), e)),
    }
}

/// Move a file into place, replacing whatever is at `dst`.
///
/// A same-filesystem move is a single rename, so `dst` is never observed
/// half-written. Across filesystems the content is copied next to `dst`
/// first and renamed from there, which keeps that guarantee.
///
/// # Errors
/// Returns FsError if neither the rename nor the copy fallback succeed
pub fn move_file(src: &Path, dst: &Path) -> Result<(), FsError> {
    ensure_parent_dir_exists(dst)?;

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::io(src.display(), e)),
        Err(rename_err) => {
            tracing::debug!(
                "Rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                rename_err
            );
            let mut staged = dst.as_os_str().to_owned();
            staged.push(".part");
            let staged = Path::new(&staged);

            if let Err(e) = copy_file_with_metadata(src, staged) {
                let _ = fs::remove_file(staged);
                return Err(e);
            }
            fs::rename(staged, dst).map_err(|e| FsError::io(dst.display(), e))?;
            fs::remove_file(src).map_err(|e| FsError::io(src.display(), e))
        }
    }
}

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// # Errors
/// Returns FsError on the first entry that cannot be removed
pub fn clear_directory(dir: &Path) -> Result<(), FsError> {
    let entries = fs::read_dir(dir).map_err(|e| FsError::io(dir.display(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::io(dir.display(), e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| FsError::io(path.display(), e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| FsError::io(path.display(), e))?;
    }
    Ok(())
}
