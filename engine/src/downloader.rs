//! Downloading files from a file connection to the local filesystem.
//!
//! A run goes through these steps:
//! 1. Validate the configuration against the active strategy
//! 2. Check the local root, the connection and the source root
//! 3. Collect candidates (explicit list, or a filtered walk of the source)
//! 4. Resolve each candidate to a local destination and an optional temp path
//! 5. Transfer file by file, advancing the watermark after each success
//!
//! Steps 1 to 4 fail the whole run. Step 5 never does: every file ends up in
//! exactly one bucket of the returned `DownloadResult`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::{self, FileConnection};
use crate::error::{EngineError, FsError, Result};
use crate::filter::{FileFilter, FileHwmFilter};
use crate::fs_ops;
use crate::hwm::{FileHwm, HwmKind, RemoteFolder};
use crate::limit::{FileLimit, MaxFilesCount};
use crate::model::{FileWriteMode, RemoteFile, TransferItem};
use crate::path::{LocalPath, RemotePath};
use crate::progress::ProgressCallback;
use crate::result::{DownloadResult, FileSet};
use crate::store::{HwmStore, MemoryHwmStore};
use crate::strategy::{self, Strategy};
use crate::transfer::{self, TransferBackend, TransferOptions};

const NAME: &str = "FileDownloader";

/// Options of `FileDownloader`.
pub type DownloaderOptions = TransferOptions;

/// Downloads files from a remote source directory into a local directory.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use transfer_engine::{FileDownloader, HwmKind, LocalFsConnection};
/// use transfer_engine::strategy::{self, Strategy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = Arc::new(LocalFsConnection::new("/mnt/share")?);
/// let mut downloader = FileDownloader::builder(connection, "/data/incoming")
///     .source_path("/exports/daily")
///     .temp_path("/data/tmp")
///     .hwm_kind(HwmKind::FileList)
///     .build()?;
///
/// let _guard = strategy::enter(Strategy::incremental());
/// let result = downloader.run(None)?;
/// result.raise_if_failed()?;
/// # Ok(())
/// # }
/// ```
pub struct FileDownloader {
    connection: Arc<dyn FileConnection>,
    local_path: LocalPath,
    source_path: Option<RemotePath>,
    temp_path: Option<LocalPath>,
    filters: Vec<Box<dyn FileFilter>>,
    limits: Vec<Box<dyn FileLimit>>,
    hwm_kind: Option<HwmKind>,
    hwm_store: Arc<dyn HwmStore>,
    options: DownloaderOptions,
    progress: Option<Box<dyn ProgressCallback>>,
}

/// Builder for `FileDownloader`.
pub struct FileDownloaderBuilder {
    connection: Arc<dyn FileConnection>,
    local_path: LocalPath,
    source_path: Option<RemotePath>,
    temp_path: Option<LocalPath>,
    filters: Vec<Box<dyn FileFilter>>,
    limits: Vec<Box<dyn FileLimit>>,
    hwm_kind: Option<HwmKind>,
    hwm_store: Option<Arc<dyn HwmStore>>,
    options: DownloaderOptions,
    progress: Option<Box<dyn ProgressCallback>>,
}

impl FileDownloaderBuilder {
    /// Remote directory to download from.
    pub fn source_path(mut self, path: impl Into<RemotePath>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Local staging directory. Should be on the same filesystem as the
    /// local root, so a staged file is moved into place with a rename.
    pub fn temp_path(mut self, path: impl Into<LocalPath>) -> Self {
        self.temp_path = Some(path.into());
        self
    }

    pub fn filter(mut self, filter: Box<dyn FileFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: Vec<Box<dyn FileFilter>>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Add a limit. The default `MaxFilesCount(100)` is replaced by the
    /// first explicit limit.
    pub fn limit(mut self, limit: Box<dyn FileLimit>) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn limits(mut self, limits: Vec<Box<dyn FileLimit>>) -> Self {
        self.limits.extend(limits);
        self
    }

    /// Walk the whole source tree.
    pub fn no_limit(mut self) -> Self {
        self.limits.clear();
        self.limits.push(Box::new(MaxFilesCount::new(usize::MAX)));
        self
    }

    /// Track downloaded files with a watermark of this kind.
    pub fn hwm_kind(mut self, kind: HwmKind) -> Self {
        self.hwm_kind = Some(kind);
        self
    }

    pub fn hwm_store(mut self, store: Arc<dyn HwmStore>) -> Self {
        self.hwm_store = Some(store);
        self
    }

    pub fn options(mut self, options: DownloaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mode(mut self, mode: FileWriteMode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn delete_source(mut self, delete_source: bool) -> Self {
        self.options.delete_source = delete_source;
        self
    }

    pub fn progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// - `EngineError::HwmWithoutSource` if a watermark kind is set without a
    ///   source path
    /// - `EngineError::Fs` with `FsError::Unsupported` if the connection
    ///   cannot do what the options ask for
    pub fn build(self) -> Result<FileDownloader> {
        if self.hwm_kind.is_some() && self.source_path.is_none() {
            return Err(EngineError::HwmWithoutSource);
        }

        let capabilities = self.connection.capabilities();
        let url = self.connection.instance_url();
        for operation in ["list", "stat", "read"] {
            capabilities.require(operation, &url)?;
        }
        if self.options.delete_source {
            capabilities.require("write", &url)?;
        }

        let limits = if self.limits.is_empty() {
            vec![Box::new(MaxFilesCount::default()) as Box<dyn FileLimit>]
        } else {
            self.limits
        };

        Ok(FileDownloader {
            connection: self.connection,
            local_path: self.local_path.resolve(),
            source_path: self.source_path.map(|p| p.resolve()),
            temp_path: self.temp_path.map(|p| p.resolve()),
            filters: self.filters,
            limits,
            hwm_kind: self.hwm_kind,
            hwm_store: self
                .hwm_store
                .unwrap_or_else(|| Arc::new(MemoryHwmStore::new())),
            options: self.options,
            progress: self.progress,
        })
    }
}

impl FileDownloader {
    /// Start configuring a downloader into `local_path`.
    pub fn builder(
        connection: Arc<dyn FileConnection>,
        local_path: impl Into<LocalPath>,
    ) -> FileDownloaderBuilder {
        FileDownloaderBuilder {
            connection,
            local_path: local_path.into(),
            source_path: None,
            temp_path: None,
            filters: Vec::new(),
            limits: Vec::new(),
            hwm_kind: None,
            hwm_store: None,
            options: DownloaderOptions::default(),
            progress: None,
        }
    }

    pub fn local_path(&self) -> &LocalPath {
        &self.local_path
    }

    pub fn source_path(&self) -> Option<&RemotePath> {
        self.source_path.as_ref()
    }

    pub fn options(&self) -> &DownloaderOptions {
        &self.options
    }

    /// Download files.
    ///
    /// With `files` set, exactly those paths are downloaded and filters and
    /// limits are not applied. Otherwise the source path is walked.
    ///
    /// # Errors
    /// Configuration and precondition failures abort the run:
    /// - `EngineError::Strategy` if the watermark kind does not fit the active strategy
    /// - `EngineError::NoSource` if neither `files` nor a source path is given
    /// - `EngineError::NotADirectory` / `EngineError::DirectoryNotFound` for bad roots
    /// - `EngineError::Fs` if the connection check fails
    /// - `EngineError::PathMismatch` / `EngineError::RelativePathWithoutSource`
    ///   for explicit paths that cannot be placed
    /// - `EngineError::DestinationConflict` if two explicit paths would be
    ///   written to the same destination
    ///
    /// Per-file failures are reported in the result instead.
    pub fn run(&mut self, files: Option<Vec<RemotePath>>) -> Result<DownloadResult> {
        let strategy = strategy::current();
        self.check_strategy(&strategy)?;

        if files.is_none() && self.source_path.is_none() {
            return Err(EngineError::NoSource);
        }

        info!("===== {} starts =====", NAME);
        self.log_options(files.as_deref(), &strategy);

        self.check_local_path()?;
        self.connection.check()?;
        if let Some(source) = &self.source_path {
            self.check_source_path(source)?;
        }

        let hwm = self.load_hwm()?;
        let mut mtimes = HashMap::new();
        let files: Vec<RemotePath> = match files {
            Some(files) => files,
            None => {
                let found = self.collect_files(hwm.clone())?;
                for file in found.iter() {
                    if let Some(mtime) = file.stat.mtime {
                        mtimes.insert(file.path.clone(), mtime);
                    }
                }
                found.into_iter().map(|file| file.path).collect()
            }
        };

        if files.is_empty() {
            warn!("|{}| No files to download!", NAME);
            return Ok(DownloadResult::new());
        }

        let temp_dir = self
            .temp_path
            .as_ref()
            .map(|temp| temp.join(transfer::temp_dir_name()));
        let mut items = transfer::resolve_items(
            files,
            self.source_path.as_ref(),
            &self.local_path,
            temp_dir.as_ref(),
        )?;
        if self.hwm_kind == Some(HwmKind::FileModifiedTime) {
            self.order_by_mtime(&mut items, &mtimes);
        }

        if self.options.mode == FileWriteMode::DeleteAll {
            warn!("|{}| Removing all files from '{}'", NAME, self.local_path);
            fs_ops::clear_directory(self.local_path.as_path())?;
        }

        let mut backend = DownloadBackend {
            connection: self.connection.as_ref(),
            hwm,
            store: self.hwm_store.as_ref(),
            frozen: false,
        };
        let result = transfer::process_items(
            NAME,
            &mut backend,
            &items,
            &self.options,
            self.progress.as_deref(),
        );

        if let Some(temp_dir) = temp_dir {
            remove_temp_dir(&temp_dir);
        }

        info!("|{}| Download result: {}", NAME, result.summary());
        info!("\n{}", result);
        info!("----- {} ends -----", NAME);
        Ok(result)
    }

    /// Files under the source path after filters, limits and the watermark.
    ///
    /// # Errors
    /// - `EngineError::NoSource` without a source path
    /// - `EngineError::DirectoryNotFound` / `EngineError::NotADirectory` for a bad source path
    /// - `EngineError::Walk` if listing the remote tree fails
    pub fn view_files(&mut self) -> Result<FileSet<RemoteFile>> {
        let source = self.source_path.clone().ok_or(EngineError::NoSource)?;
        self.check_source_path(&source)?;
        let hwm = self.load_hwm()?;
        self.collect_files(hwm)
    }

    /// Oldest first, so a `file_modified_time` watermark passes files in the
    /// order it compares them. Files with an unknown mtime go first.
    fn order_by_mtime(
        &self,
        items: &mut [TransferItem<RemotePath, LocalPath>],
        known: &HashMap<RemotePath, DateTime<Utc>>,
    ) {
        items.sort_by_cached_key(|item| match known.get(&item.source) {
            Some(mtime) => Some(*mtime),
            None => self
                .connection
                .get_file(&item.source)
                .ok()
                .and_then(|file| file.stat.mtime),
        });
    }

    fn collect_files(&mut self, hwm: Option<FileHwm>) -> Result<FileSet<RemoteFile>> {
        let source = self.source_path.clone().ok_or(EngineError::NoSource)?;
        info!("|{}| Getting files list from path '{}'", NAME, source);

        let hwm_filter = hwm.map(FileHwmFilter::new);
        let mut filters: Vec<&dyn FileFilter> = self.filters.iter().map(|f| &**f).collect();
        if let Some(hwm_filter) = &hwm_filter {
            filters.push(hwm_filter);
        }

        let mut files = FileSet::new();
        for entry in connection::walk(self.connection.as_ref(), &source, &filters, &mut self.limits) {
            let entry = entry.map_err(|e| EngineError::Walk {
                path: source.to_string(),
                source: e,
            })?;
            files.extend(entry.files);
        }
        Ok(files)
    }

    fn check_strategy(&self, strategy: &Strategy) -> Result<()> {
        if self.hwm_kind.is_some() {
            strategy.check_file_hwm_support()?;
        }
        Ok(())
    }

    fn check_local_path(&self) -> Result<()> {
        if self.local_path.exists() && !self.local_path.is_dir() {
            return Err(EngineError::NotADirectory {
                path: self.local_path.to_string(),
            });
        }
        fs::create_dir_all(&self.local_path).map_err(|e| FsError::io(&self.local_path, e))?;
        Ok(())
    }

    fn check_source_path(&self, source: &RemotePath) -> Result<()> {
        match self.connection.get_directory(source) {
            Ok(_) => Ok(()),
            Err(FsError::NotFound { path }) => Err(EngineError::DirectoryNotFound { path }),
            Err(FsError::NotADirectory { path }) => Err(EngineError::NotADirectory { path }),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored watermark for the source path, or an empty one.
    fn load_hwm(&self) -> Result<Option<FileHwm>> {
        let (kind, source) = match (self.hwm_kind, &self.source_path) {
            (Some(kind), Some(source)) => (kind, source),
            _ => return Ok(None),
        };

        let folder = RemoteFolder::new(source.clone(), self.connection.instance_url());
        let empty = FileHwm::new(kind, folder);
        let name = empty.qualified_name();

        match self.hwm_store.get(&name)? {
            Some(stored) if stored.kind() != kind => Err(EngineError::HwmKindMismatch {
                name,
                expected: kind,
                found: stored.kind(),
            }),
            Some(stored) => {
                info!("|{}| Loaded watermark {} from {} store", NAME, stored, self.hwm_store.store_type());
                Ok(Some(stored))
            }
            None => Ok(Some(empty)),
        }
    }

    fn log_options(&self, files: Option<&[RemotePath]>, strategy: &Strategy) {
        info!("|{}| Using connection: {}", NAME, self.connection.instance_url());
        info!("|{}| Using options:", NAME);
        match &self.source_path {
            Some(source) => info!("    source_path = '{}'", source),
            None => info!("    source_path = None"),
        }
        info!("    local_path = '{}'", self.local_path);
        match &self.temp_path {
            Some(temp) => info!("    temp_path = '{}'", temp),
            None => info!("    temp_path = None"),
        }
        for filter in &self.filters {
            info!("    filter: {}", filter.describe());
        }
        for limit in &self.limits {
            info!("    limit: {}", limit.describe());
        }
        info!("    mode = {}", self.options.mode);
        info!("    delete_source = {}", self.options.delete_source);
        if let Some(kind) = self.hwm_kind {
            info!("    hwm_kind = {}, strategy = {}", kind, strategy);
        }

        if self.options.delete_source {
            warn!("|{}| delete_source is set, source files will be removed after download", NAME);
        }
        if self.options.mode == FileWriteMode::DeleteAll {
            warn!("|{}| mode is delete_all, local directory content will be removed", NAME);
        }
        if files.is_some() && self.source_path.is_some() {
            warn!(
                "|{}| Passed both source_path and a file list at the same time, using the file list",
                NAME
            );
        }
    }
}

struct DownloadBackend<'a> {
    connection: &'a dyn FileConnection,
    hwm: Option<FileHwm>,
    store: &'a dyn HwmStore,
    /// A `file_modified_time` watermark stops moving after the first failure,
    /// otherwise a newer file would cover the failed one for good
    frozen: bool,
}

impl TransferBackend<RemotePath, LocalPath> for DownloadBackend<'_> {
    fn source_file(&self, path: &RemotePath) -> Result<Option<RemoteFile>> {
        if !self.connection.path_exists(path)? {
            return Ok(None);
        }
        Ok(Some(self.connection.get_file(path)?))
    }

    fn destination_exists(&self, path: &LocalPath) -> Result<bool> {
        Ok(path.exists())
    }

    fn transfer(&self, source: &RemoteFile, target: &LocalPath, replace: bool) -> Result<u64> {
        let local = self.connection.download_file(&source.path, target, replace)?;
        Ok(local.stat.size)
    }

    fn promote(&self, staged: &LocalPath, target: &LocalPath) -> Result<()> {
        fs_ops::move_file(staged.as_path(), target.as_path())?;
        Ok(())
    }

    fn remove_source(&self, source: &RemoteFile) -> Result<()> {
        self.connection.remove_file(&source.path)?;
        Ok(())
    }

    fn commit(&mut self, source: &RemoteFile) -> Result<()> {
        if self.frozen {
            info!("|{}| Watermark kept in place after an earlier failure", NAME);
            return Ok(());
        }
        if let Some(hwm) = &mut self.hwm {
            // Only adopt the new value once it is persisted
            let mut next = hwm.clone();
            if next.update(source) {
                self.store.save(&next)?;
                *hwm = next;
            }
        }
        Ok(())
    }

    fn file_failed(&mut self, source: &RemotePath) {
        let by_time = matches!(&self.hwm, Some(hwm) if hwm.kind() == HwmKind::FileModifiedTime);
        if by_time && !self.frozen {
            warn!(
                "|{}| Couldn't download '{}', the watermark will not move past it in this run",
                NAME, source
            );
            self.frozen = true;
        }
    }
}

fn remove_temp_dir(temp_dir: &LocalPath) {
    info!("|{}| Removing temp directory '{}'", NAME, temp_dir);
    if !temp_dir.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(temp_dir) {
        error!("|{}| Error while removing temp directory '{}': {}", NAME, temp_dir, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalFsConnection;
    use tempfile::TempDir;

    fn connection(dir: &TempDir) -> Arc<dyn FileConnection> {
        Arc::new(LocalFsConnection::new(dir.path()).expect("Failed to open connection"))
    }

    #[test]
    fn test_hwm_requires_source_path() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");

        let result = FileDownloader::builder(connection(&remote), local.path())
            .hwm_kind(HwmKind::FileList)
            .build();
        assert!(matches!(result, Err(EngineError::HwmWithoutSource)));
    }

    #[test]
    fn test_run_without_source_fails() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");

        let mut downloader = FileDownloader::builder(connection(&remote), local.path())
            .build()
            .expect("Failed to build downloader");
        assert!(matches!(downloader.run(None), Err(EngineError::NoSource)));
    }

    #[test]
    fn test_hwm_rejected_in_snapshot_strategy() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir(remote.path().join("src")).expect("Failed to create dir");

        let mut downloader = FileDownloader::builder(connection(&remote), local.path())
            .source_path("/src")
            .hwm_kind(HwmKind::FileList)
            .build()
            .expect("Failed to build downloader");

        assert!(matches!(downloader.run(None), Err(EngineError::Strategy(_))));
    }

    #[test]
    fn test_delete_source_needs_write_capability() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        let conn = LocalFsConnection::new(remote.path())
            .expect("Failed to open connection")
            .with_capabilities(crate::connection::Capabilities::read_only());

        let result = FileDownloader::builder(Arc::new(conn), local.path())
            .source_path("/")
            .delete_source(true)
            .build();
        assert!(matches!(
            result,
            Err(EngineError::Fs(FsError::Unsupported { operation: "write", .. }))
        ));
    }

    #[test]
    fn test_default_limit_is_one_hundred_files() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        for i in 0..105 {
            fs::write(remote.path().join(format!("f{:03}.txt", i)), b"x").expect("Failed to write");
        }

        let mut downloader = FileDownloader::builder(connection(&remote), local.path())
            .source_path("/")
            .build()
            .expect("Failed to build downloader");
        assert_eq!(downloader.view_files().expect("Failed to list").len(), 100);
    }
}
