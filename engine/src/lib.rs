//! # Transfer Engine - Incremental File Transfer Library
//!
//! A headless engine that moves files between a remote file system and the
//! local one, remembering what was already transferred so that repeated runs
//! only pick up new files.
//!
//! ## Overview
//!
//! - `FileDownloader` copies a remote tree (or an explicit list of files)
//!   into a local directory, through optional filters and limits
//! - `FileUploader` does the reverse, from a local directory to a remote one
//! - Every file ends up in exactly one bucket of the result: successful,
//!   failed, skipped or missing. A failing file never aborts the run
//! - With a temp path, files are staged and moved into place, so a
//!   destination is never left half written
//! - File watermarks (`FileHwm`) record what was downloaded. They are
//!   loaded from and saved to a `HwmStore` and only used inside an
//!   incremental `Strategy`
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use transfer_engine::{FileDownloader, FileWriteMode, LocalFsConnection};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = Arc::new(LocalFsConnection::new("/mnt/share")?);
//! let mut downloader = FileDownloader::builder(connection, "/data/incoming")
//!     .source_path("/exports")
//!     .mode(FileWriteMode::Ignore)
//!     .build()?;
//!
//! let result = downloader.run(None)?;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **path**: Remote and local path types
//! - **model**: File entries, write modes, transfer items
//! - **result**: Result sets returned by a run
//! - **error**: Error types and handling
//! - **connection**: The `FileConnection` trait and the local backend
//! - **filter** / **limit**: Candidate selection during a walk
//! - **hwm** / **store**: File watermarks and their persistence
//! - **strategy**: The scoped strategy context
//! - **downloader** / **uploader**: Run orchestration
//! - **progress**: Progress callback trait
//! - **fs_ops**: Low-level local filesystem operations

pub mod connection;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod fs_ops;
pub mod hwm;
pub mod limit;
pub mod model;
pub mod path;
pub mod progress;
pub mod result;
pub mod store;
pub mod strategy;
pub mod transfer;
pub mod uploader;

// Re-export main types
pub use connection::{Capabilities, ConnectionParams, FileConnection, LocalFsConnection};
pub use downloader::{DownloaderOptions, FileDownloader, FileDownloaderBuilder};
pub use error::{EngineError, FsError};
pub use filter::{ExcludeDirsFilter, FileFilter, FileHwmFilter, FilterConfig, GlobFilter, RegexFilter};
pub use hwm::{FileHwm, HwmKind, HwmValue, RemoteFolder};
pub use limit::{FileLimit, LimitConfig, MaxFilesCount};
pub use model::{FailedFile, FileEntry, FileWriteMode, LocalFile, PathStat, RemoteFile};
pub use path::{LocalPath, PathError, RemotePath};
pub use progress::{FileOutcome, ProgressCallback, TransferSummary};
pub use result::{DownloadResult, FileSet, TransferResult, UploadResult};
pub use store::{HwmStore, JsonFileHwmStore, MemoryHwmStore, StoreError};
pub use strategy::Strategy;
pub use transfer::TransferOptions;
pub use uploader::{FileUploader, FileUploaderBuilder, UploaderOptions};
