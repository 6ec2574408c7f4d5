//! Error types for the transfer engine.
//!
//! There are two layers:
//! - `FsError`: a single filesystem operation failed, either through a file
//!   connection or on the local disk
//! - `EngineError`: anything a transfer run can fail with
//!
//! Configuration and precondition failures are returned from `run` and abort
//! the whole run before any file is moved. Per-file failures never abort a
//! run; they are attached to the failed entry in the transfer result.

use std::io;
use thiserror::Error;

use crate::hwm::HwmKind;
use crate::path::PathError;
use crate::store::StoreError;

/// Errors raised by a single filesystem operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist
    #[error("'{path}' does not exist")]
    NotFound { path: String },

    /// Path exists but is not a regular file
    #[error("'{path}' is not a file")]
    NotAFile { path: String },

    /// Path exists but is not a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: String },

    /// Target exists and replacing it was not allowed
    #[error("File '{path}' already exists")]
    AlreadyExists { path: String },

    /// Non-recursive removal of a directory with content
    #[error("Cannot delete non-empty directory '{path}'")]
    DirectoryNotEmpty { path: String },

    /// Transferred file size differs from the source
    #[error("Size of '{path}' ({actual} bytes) does not match the source ({expected} bytes)")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// The connection does not support the requested operation
    #[error("Operation '{operation}' is not supported by {url}")]
    Unsupported {
        operation: &'static str,
        url: String,
    },

    /// Connection check failed
    #[error("Connection is unavailable: {url} ({reason})")]
    Unavailable { url: String, reason: String },

    /// Any other I/O failure
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Wrap an I/O error, mapping the common kinds to dedicated variants.
    pub fn io(path: impl ToString, source: io::Error) -> Self {
        let path = path.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => FsError::NotFound { path },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path },
            _ => FsError::Io { path, source },
        }
    }

    /// Extract the OS error code, if this wraps an OS error.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            FsError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Errors of a transfer run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Active strategy does not allow the requested watermark handling
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// Neither an explicit file list nor a source root was given
    #[error("Neither file collection nor source path are passed")]
    NoSource,

    /// A watermark kind was configured without a source root to scope it
    #[error("If a watermark kind is passed, source path must be specified")]
    HwmWithoutSource,

    /// Explicit absolute path outside the configured source root
    #[error("File path '{path}' does not match source path '{root}'")]
    PathMismatch { path: String, root: String },

    /// Explicit relative path while no source root is configured
    #[error("Cannot pass relative file path '{path}' with empty source path")]
    RelativePathWithoutSource { path: String },

    /// Two explicit source files resolve to the same destination
    #[error("Files '{first}' and '{second}' would both be written to '{destination}'")]
    DestinationConflict {
        destination: String,
        first: String,
        second: String,
    },

    /// Invalid option value (bad glob, bad regex, unknown name...)
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    /// Root directory required by the run does not exist
    #[error("Directory '{path}' does not exist")]
    DirectoryNotFound { path: String },

    /// Root path required by the run exists but is not a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: String },

    /// Listing the source tree failed
    #[error("Couldn't read directory tree from '{path}'")]
    Walk {
        path: String,
        #[source]
        source: FsError,
    },

    /// Destination exists and the write mode is `error`
    #[error("File '{path}' already exists")]
    AlreadyExists { path: String },

    /// Store returned a watermark of another kind than configured
    #[error("Watermark '{name}' has kind '{found}', expected '{expected}'")]
    HwmKindMismatch {
        name: String,
        expected: HwmKind,
        found: HwmKind,
    },

    /// A checked transfer result contained unwanted entries
    #[error("{0}")]
    ResultCheck(String),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("Watermark store error: {0}")]
    HwmStore(#[from] StoreError),

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Result type alias for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
