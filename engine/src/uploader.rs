//! Uploading local files to a file connection.
//!
//! The mirror image of the downloader: the source is a local directory (or an
//! explicit list of local files), the target is a directory on the
//! connection. Staging happens in a remote temp directory and a staged file
//! is moved into place with a remote rename. Uploads are not tracked by
//! watermarks.

use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::FileConnection;
use crate::error::{EngineError, FsError, Result};
use crate::fs_ops;
use crate::model::{FileWriteMode, LocalFile};
use crate::path::{LocalPath, RemotePath};
use crate::progress::ProgressCallback;
use crate::result::{FileSet, UploadResult};
use crate::transfer::{self, TransferBackend, TransferOptions};

const NAME: &str = "FileUploader";

/// Options of `FileUploader`.
pub type UploaderOptions = TransferOptions;

/// Uploads local files into a remote target directory.
pub struct FileUploader {
    connection: Arc<dyn FileConnection>,
    target_path: RemotePath,
    local_path: Option<LocalPath>,
    temp_path: Option<RemotePath>,
    options: UploaderOptions,
    progress: Option<Box<dyn ProgressCallback>>,
}

/// Builder for `FileUploader`.
pub struct FileUploaderBuilder {
    connection: Arc<dyn FileConnection>,
    target_path: RemotePath,
    local_path: Option<LocalPath>,
    temp_path: Option<RemotePath>,
    options: UploaderOptions,
    progress: Option<Box<dyn ProgressCallback>>,
}

impl FileUploaderBuilder {
    /// Local directory to upload from.
    pub fn local_path(mut self, path: impl Into<LocalPath>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Remote staging directory, on the same filesystem as the target.
    pub fn temp_path(mut self, path: impl Into<RemotePath>) -> Self {
        self.temp_path = Some(path.into());
        self
    }

    pub fn options(mut self, options: UploaderOptions) -> Self {
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
    /// Returns `EngineError::Fs` with `FsError::Unsupported` if the
    /// connection cannot write, or cannot rename while a temp path is set.
    pub fn build(self) -> Result<FileUploader> {
        let capabilities = self.connection.capabilities();
        let url = self.connection.instance_url();
        capabilities.require("stat", &url)?;
        capabilities.require("write", &url)?;
        if self.temp_path.is_some() {
            capabilities.require("rename", &url)?;
        }

        Ok(FileUploader {
            connection: self.connection,
            target_path: self.target_path.resolve(),
            local_path: self.local_path.map(|p| p.resolve()),
            temp_path: self.temp_path.map(|p| p.resolve()),
            options: self.options,
            progress: self.progress,
        })
    }
}

impl FileUploader {
    /// Start configuring an uploader into the remote `target_path`.
    pub fn builder(
        connection: Arc<dyn FileConnection>,
        target_path: impl Into<RemotePath>,
    ) -> FileUploaderBuilder {
        FileUploaderBuilder {
            connection,
            target_path: target_path.into(),
            local_path: None,
            temp_path: None,
            options: UploaderOptions::default(),
            progress: None,
        }
    }

    pub fn target_path(&self) -> &RemotePath {
        &self.target_path
    }

    /// Upload files.
    ///
    /// With `files` set, exactly those local paths are uploaded. Otherwise
    /// the whole local path is.
    ///
    /// # Errors
    /// - `EngineError::NoSource` if neither `files` nor a local path is given
    /// - `EngineError::DirectoryNotFound` / `EngineError::NotADirectory` for a bad local path
    /// - `EngineError::Fs` if the connection check fails or the target
    ///   directory cannot be created
    /// - `EngineError::PathMismatch` / `EngineError::RelativePathWithoutSource`
    ///   for explicit paths that cannot be placed
    /// - `EngineError::DestinationConflict` if two explicit paths would be
    ///   written to the same destination
    pub fn run(&mut self, files: Option<Vec<LocalPath>>) -> Result<UploadResult> {
        if files.is_none() && self.local_path.is_none() {
            return Err(EngineError::NoSource);
        }

        info!("===== {} starts =====", NAME);
        self.log_options(files.as_deref());

        if let Some(local) = &self.local_path {
            check_local_path(local)?;
        }
        self.connection.check()?;
        self.connection.mkdir(&self.target_path)?;

        let files: Vec<LocalPath> = match files {
            // Compared against the resolved local path
            Some(files) => files
                .into_iter()
                .map(|file| if file.is_absolute() { file.resolve() } else { file })
                .collect(),
            None => self.view_files()?.into_iter().map(|file| file.path).collect(),
        };

        if files.is_empty() {
            warn!("|{}| No files to upload!", NAME);
            return Ok(UploadResult::new());
        }

        let temp_dir = self
            .temp_path
            .as_ref()
            .map(|temp| temp.join(transfer::temp_dir_name()));
        let items = transfer::resolve_items(
            files,
            self.local_path.as_ref(),
            &self.target_path,
            temp_dir.as_ref(),
        )?;

        if self.options.mode == FileWriteMode::DeleteAll {
            warn!("|{}| Removing all files from '{}'", NAME, self.target_path);
            self.connection.rmdir(&self.target_path, true)?;
            self.connection.mkdir(&self.target_path)?;
        }

        let mut backend = UploadBackend {
            connection: self.connection.as_ref(),
        };
        let result = transfer::process_items(
            NAME,
            &mut backend,
            &items,
            &self.options,
            self.progress.as_deref(),
        );

        if let Some(temp_dir) = temp_dir {
            info!("|{}| Removing temp directory '{}'", NAME, temp_dir);
            if let Err(e) = self.connection.rmdir(&temp_dir, true) {
                error!("|{}| Error while removing temp directory '{}': {}", NAME, temp_dir, e);
            }
        }

        info!("|{}| Upload result: {}", NAME, result.summary());
        info!("\n{}", result);
        info!("----- {} ends -----", NAME);
        Ok(result)
    }

    /// All files under the local path.
    ///
    /// # Errors
    /// - `EngineError::NoSource` without a local path
    /// - `EngineError::Walk` if the local tree cannot be read
    pub fn view_files(&self) -> Result<FileSet<LocalFile>> {
        let local = self.local_path.as_ref().ok_or(EngineError::NoSource)?;
        info!("|{}| Getting files list from path '{}'", NAME, local);

        let files = fs_ops::enumerate_tree(local.as_path()).map_err(|e| EngineError::Walk {
            path: local.to_string(),
            source: e,
        })?;
        Ok(files.into_iter().collect())
    }

    fn log_options(&self, files: Option<&[LocalPath]>) {
        info!("|{}| Using connection: {}", NAME, self.connection.instance_url());
        info!("|{}| Using options:", NAME);
        match &self.local_path {
            Some(local) => info!("    local_path = '{}'", local),
            None => info!("    local_path = None"),
        }
        info!("    target_path = '{}'", self.target_path);
        match &self.temp_path {
            Some(temp) => info!("    temp_path = '{}'", temp),
            None => info!("    temp_path = None"),
        }
        info!("    mode = {}", self.options.mode);
        info!("    delete_source = {}", self.options.delete_source);

        if self.options.delete_source {
            warn!("|{}| delete_source is set, local files will be removed after upload", NAME);
        }
        if self.options.mode == FileWriteMode::DeleteAll {
            warn!("|{}| mode is delete_all, target directory content will be removed", NAME);
        }
        if files.is_some() && self.local_path.is_some() {
            warn!(
                "|{}| Passed both local_path and a file list at the same time, using the file list",
                NAME
            );
        }
    }
}

fn check_local_path(local: &LocalPath) -> Result<()> {
    if !local.exists() {
        return Err(EngineError::DirectoryNotFound {
            path: local.to_string(),
        });
    }
    if !local.is_dir() {
        return Err(EngineError::NotADirectory {
            path: local.to_string(),
        });
    }
    Ok(())
}

struct UploadBackend<'a> {
    connection: &'a dyn FileConnection,
}

impl TransferBackend<LocalPath, RemotePath> for UploadBackend<'_> {
    fn source_file(&self, path: &LocalPath) -> Result<Option<LocalFile>> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs_ops::local_file(path)?))
    }

    fn destination_exists(&self, path: &RemotePath) -> Result<bool> {
        Ok(self.connection.path_exists(path)?)
    }

    fn transfer(&self, source: &LocalFile, target: &RemotePath, replace: bool) -> Result<u64> {
        let remote = self.connection.upload_file(&source.path, target, replace)?;
        Ok(remote.stat.size)
    }

    fn promote(&self, staged: &RemotePath, target: &RemotePath) -> Result<()> {
        self.connection.rename_file(staged, target, true)?;
        Ok(())
    }

    fn remove_source(&self, source: &LocalFile) -> Result<()> {
        fs::remove_file(&source.path).map_err(|e| FsError::io(&source.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalFsConnection;
    use tempfile::TempDir;

    #[test]
    fn test_run_without_source_fails() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let conn = Arc::new(LocalFsConnection::new(remote.path()).expect("Failed to open connection"));

        let mut uploader = FileUploader::builder(conn, "/target")
            .build()
            .expect("Failed to build uploader");
        assert!(matches!(uploader.run(None), Err(EngineError::NoSource)));
    }

    #[test]
    fn test_missing_local_path_is_fatal() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        let conn = Arc::new(LocalFsConnection::new(remote.path()).expect("Failed to open connection"));

        let mut uploader = FileUploader::builder(conn, "/target")
            .local_path(local.path().join("absent"))
            .build()
            .expect("Failed to build uploader");
        assert!(matches!(
            uploader.run(None),
            Err(EngineError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_temp_path_needs_rename_capability() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let mut caps = crate::connection::Capabilities::full();
        caps.rename = false;
        let conn = LocalFsConnection::new(remote.path())
            .expect("Failed to open connection")
            .with_capabilities(caps);

        let result = FileUploader::builder(Arc::new(conn), "/target")
            .temp_path("/tmp")
            .build();
        assert!(result.is_err());
    }
}
