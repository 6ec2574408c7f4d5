//! File connections.
//!
//! `FileConnection` is the seam between the transfer engine and a concrete
//! file system client (FTP, HDFS, SFTP, a mounted share). A backend only
//! implements a small set of primitives; the checked operations the engine
//! calls are provided on top of them:
//! - existence and type checks with `NotFound`, `NotAFile`, `NotADirectory`
//! - conflict handling through a `replace` flag
//! - size verification after every download and upload
//!
//! `walk` enumerates a remote tree lazily through the filter and limit
//! pipeline.

mod local;

pub use local::LocalFsConnection;

use std::fmt;
use tracing::{debug, info, warn};

use crate::error::FsError;
use crate::filter::{match_all_filters, FileFilter};
use crate::fs_ops;
use crate::limit::{limits_reached, limits_stop_at, reset_limits, FileLimit};
use crate::model::{LocalFile, PathStat, RemoteFile};
use crate::path::{LocalPath, RemotePath};

/// Where a connection points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// URL scheme, e.g. `sftp`
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    /// Directory the connection is rooted at, if it is not the server root
    pub root: Option<String>,
}

impl ConnectionParams {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>) -> Self {
        ConnectionParams {
            protocol: protocol.into(),
            host: host.into(),
            port: None,
            root: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// URL identifying the server and root, used to scope watermarks.
    pub fn instance_url(&self) -> String {
        let mut url = format!("{}://{}", self.protocol, self.host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{}", port));
        }
        if let Some(root) = &self.root {
            if !root.starts_with('/') {
                url.push('/');
            }
            url.push_str(root);
        }
        url
    }
}

/// Operations a connection supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub list: bool,
    pub stat: bool,
    pub read: bool,
    pub write: bool,
    pub rename: bool,
}

impl Capabilities {
    /// Everything supported.
    pub fn full() -> Self {
        Capabilities {
            list: true,
            stat: true,
            read: true,
            write: true,
            rename: true,
        }
    }

    /// Read-only access.
    pub fn read_only() -> Self {
        Capabilities {
            write: false,
            rename: false,
            ..Self::full()
        }
    }

    /// Fail with `FsError::Unsupported` unless `operation` is supported.
    ///
    /// Known operation names: `list`, `stat`, `read`, `write`, `rename`.
    pub fn require(&self, operation: &'static str, url: &str) -> Result<(), FsError> {
        let supported = match operation {
            "list" => self.list,
            "stat" => self.stat,
            "read" => self.read,
            "write" => self.write,
            "rename" => self.rename,
            _ => false,
        };
        if supported {
            Ok(())
        } else {
            Err(FsError::Unsupported {
                operation,
                url: url.to_string(),
            })
        }
    }
}

/// A file system reachable through some client.
///
/// Implementors provide the primitives (`stat_path`, `list_entries`...);
/// everything else has a checked default built on them. Paths handed to the
/// primitives are absolute and normalized, and existence has been checked
/// where the primitive's contract says so.
pub trait FileConnection: Send + Sync {
    fn params(&self) -> &ConnectionParams;

    fn capabilities(&self) -> Capabilities;

    /// True if anything exists at `path`.
    fn path_exists(&self, path: &RemotePath) -> Result<bool, FsError>;

    /// Entry for an existing path, with its kind and metadata.
    fn stat_path(&self, path: &RemotePath) -> Result<RemoteFile, FsError>;

    /// Entries of an existing directory, with full paths, ordered by name.
    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteFile>, FsError>;

    /// Content of an existing file.
    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, FsError>;

    /// Create or truncate a file. The parent directory exists.
    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), FsError>;

    /// Copy an existing remote file to a local path whose parent exists.
    fn fetch_file(&self, remote: &RemotePath, local: &LocalPath) -> Result<(), FsError>;

    /// Copy a local file to a remote path whose parent exists.
    fn put_file(&self, local: &LocalPath, remote: &RemotePath) -> Result<(), FsError>;

    /// Remove an existing file.
    fn delete_file(&self, path: &RemotePath) -> Result<(), FsError>;

    /// Rename an existing file to a free path whose parent exists.
    fn move_path(&self, source: &RemotePath, target: &RemotePath) -> Result<(), FsError>;

    /// Create a directory and its missing parents.
    fn create_dir(&self, path: &RemotePath) -> Result<(), FsError>;

    /// Remove an existing empty directory.
    fn delete_empty_dir(&self, path: &RemotePath) -> Result<(), FsError>;

    fn instance_url(&self) -> String {
        self.params().instance_url()
    }

    /// Check that the connection is usable by listing its root.
    ///
    /// # Errors
    /// Returns `FsError::Unavailable` with the underlying failure as reason.
    fn check(&self) -> Result<(), FsError> {
        let url = self.instance_url();
        info!("Checking connection availability: {}", url);
        match self.list_entries(&RemotePath::root()) {
            Ok(_) => {
                info!("Connection is available");
                Ok(())
            }
            Err(e) => Err(FsError::Unavailable {
                url,
                reason: e.to_string(),
            }),
        }
    }

    fn get_stat(&self, path: &RemotePath) -> Result<PathStat, FsError> {
        Ok(self.get_entry(path)?.stat)
    }

    /// Entry at `path`, failing with `FsError::NotFound` if there is none.
    fn get_entry(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        let path = path.resolve();
        if !self.path_exists(&path)? {
            return Err(FsError::NotFound {
                path: path.to_string(),
            });
        }
        self.stat_path(&path)
    }

    fn is_dir(&self, path: &RemotePath) -> Result<bool, FsError> {
        Ok(self.get_entry(path)?.is_dir())
    }

    fn is_file(&self, path: &RemotePath) -> Result<bool, FsError> {
        Ok(self.get_entry(path)?.is_file())
    }

    /// Existing regular file at `path`.
    fn get_file(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        let entry = self.get_entry(path)?;
        if !entry.is_file() {
            return Err(FsError::NotAFile {
                path: entry.path.to_string(),
            });
        }
        Ok(entry)
    }

    /// Existing directory at `path`.
    fn get_directory(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        let entry = self.get_entry(path)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory {
                path: entry.path.to_string(),
            });
        }
        Ok(entry)
    }

    fn list_dir(&self, path: &RemotePath) -> Result<Vec<RemoteFile>, FsError> {
        let dir = self.get_directory(path)?;
        self.list_entries(&dir.path)
    }

    fn read_bytes(&self, path: &RemotePath) -> Result<Vec<u8>, FsError> {
        let file = self.get_file(path)?;
        self.read_file(&file.path)
    }

    fn read_text(&self, path: &RemotePath) -> Result<String, FsError> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| {
            FsError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Write `content` to `path`, replacing an existing file.
    fn write_bytes(&self, path: &RemotePath, content: &[u8]) -> Result<RemoteFile, FsError> {
        let path = path.resolve();
        if self.path_exists(&path)? {
            self.get_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            self.mkdir(&parent)?;
        }
        self.write_file(&path, content)?;
        self.get_file(&path)
    }

    fn write_text(&self, path: &RemotePath, content: &str) -> Result<RemoteFile, FsError> {
        self.write_bytes(path, content.as_bytes())
    }

    /// Download a remote file.
    ///
    /// # Errors
    /// - `FsError::AlreadyExists` if `local` exists and `replace` is false
    /// - `FsError::NotAFile` if `local` exists and is not a file
    /// - `FsError::SizeMismatch` if the local copy differs in size
    fn download_file(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
        replace: bool,
    ) -> Result<LocalFile, FsError> {
        debug!("Downloading file '{}' to local '{}'", remote, local);
        let remote_file = self.get_file(remote)?;

        if local.exists() {
            if !local.is_file() {
                return Err(FsError::NotAFile {
                    path: local.to_string(),
                });
            }
            if !replace {
                return Err(FsError::AlreadyExists {
                    path: local.to_string(),
                });
            }
            warn!("File '{}' already exists, overwriting", local);
            std::fs::remove_file(local).map_err(|e| FsError::io(local, e))?;
        }

        fs_ops::ensure_parent_dir_exists(local.as_path())?;
        self.fetch_file(&remote_file.path, local)?;

        let local_file = fs_ops::local_file(local)?;
        if local_file.stat.size != remote_file.stat.size {
            return Err(FsError::SizeMismatch {
                path: local.to_string(),
                expected: remote_file.stat.size,
                actual: local_file.stat.size,
            });
        }
        Ok(local_file)
    }

    /// Upload a local file.
    ///
    /// # Errors
    /// - `FsError::NotFound` or `FsError::NotAFile` for a bad local path
    /// - `FsError::AlreadyExists` if `remote` exists and `replace` is false
    /// - `FsError::SizeMismatch` if the remote copy differs in size
    fn upload_file(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
        replace: bool,
    ) -> Result<RemoteFile, FsError> {
        debug!("Uploading local file '{}' to '{}'", local, remote);
        let local_file = fs_ops::local_file(local)?;
        let remote = remote.resolve();

        if self.path_exists(&remote)? {
            let existing = self.get_file(&remote)?;
            if !replace {
                return Err(FsError::AlreadyExists {
                    path: existing.path.to_string(),
                });
            }
            warn!("File '{}' already exists, overwriting", existing.path);
            self.delete_file(&existing.path)?;
        }

        if let Some(parent) = remote.parent() {
            self.mkdir(&parent)?;
        }
        self.put_file(local, &remote)?;

        let remote_file = self.get_file(&remote)?;
        if remote_file.stat.size != local_file.stat.size {
            return Err(FsError::SizeMismatch {
                path: remote.to_string(),
                expected: local_file.stat.size,
                actual: remote_file.stat.size,
            });
        }
        Ok(remote_file)
    }

    /// Remove a file. A missing file is not an error.
    fn remove_file(&self, path: &RemotePath) -> Result<(), FsError> {
        let path = path.resolve();
        if !self.path_exists(&path)? {
            debug!("File '{}' does not exist, nothing to remove", path);
            return Ok(());
        }
        let file = self.get_file(&path)?;
        self.delete_file(&file.path)?;
        debug!("Successfully removed file '{}'", path);
        Ok(())
    }

    /// Rename a file, replacing `target` only if `replace` is set.
    fn rename_file(
        &self,
        source: &RemotePath,
        target: &RemotePath,
        replace: bool,
    ) -> Result<RemoteFile, FsError> {
        self.capabilities().require("rename", &self.instance_url())?;
        let source = self.get_file(source)?;
        let target = target.resolve();
        debug!("Renaming file '{}' to '{}'", source.path, target);

        if self.path_exists(&target)? {
            let existing = self.get_file(&target)?;
            if !replace {
                return Err(FsError::AlreadyExists {
                    path: existing.path.to_string(),
                });
            }
            warn!("File '{}' already exists, overwriting", existing.path);
            self.delete_file(&existing.path)?;
        }

        if let Some(parent) = target.parent() {
            self.mkdir(&parent)?;
        }
        self.move_path(&source.path, &target)?;
        self.get_file(&target)
    }

    /// Create a directory with its parents. An existing directory is fine.
    fn mkdir(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        let path = path.resolve();
        if self.path_exists(&path)? {
            return self.get_directory(&path);
        }
        debug!("Creating directory '{}'", path);
        self.create_dir(&path)?;
        self.get_directory(&path)
    }

    /// Remove a directory. A missing directory is not an error.
    ///
    /// # Errors
    /// Returns `FsError::DirectoryNotEmpty` if the directory has content and
    /// `recursive` is false.
    fn rmdir(&self, path: &RemotePath, recursive: bool) -> Result<(), FsError> {
        let path = path.resolve();
        if !self.path_exists(&path)? {
            debug!("Directory '{}' does not exist, nothing to remove", path);
            return Ok(());
        }
        let dir = self.get_directory(&path)?;
        let entries = self.list_entries(&dir.path)?;
        if !entries.is_empty() && !recursive {
            return Err(FsError::DirectoryNotEmpty {
                path: path.to_string(),
            });
        }
        for entry in entries {
            if entry.is_dir() {
                self.rmdir(&entry.path, true)?;
            } else {
                self.delete_file(&entry.path)?;
            }
        }
        self.delete_empty_dir(&path)?;
        info!("Successfully removed directory '{}'", path);
        Ok(())
    }

    /// Walk the tree below `root` through filters and limits.
    fn walk<'a>(
        &'a self,
        root: &RemotePath,
        filters: &'a [&'a dyn FileFilter],
        limits: &'a mut [Box<dyn FileLimit>],
    ) -> Walk<'a>
    where
        Self: Sized,
    {
        Walk::new(self, root, filters, limits)
    }
}

/// One directory visited by a walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub root: RemotePath,
    /// Subdirectories that passed the filters, in listing order
    pub dirs: Vec<RemoteFile>,
    /// Files that passed the filters, in listing order
    pub files: Vec<RemoteFile>,
}

/// Lazy top-down walk over a remote tree.
///
/// Each step lists one directory. A directory rejected by a filter is never
/// listed. Once a limit is reached the current listing is cut short and the
/// walk ends. The first listing error ends the walk too.
pub struct Walk<'a> {
    conn: &'a dyn FileConnection,
    filters: &'a [&'a dyn FileFilter],
    limits: &'a mut [Box<dyn FileLimit>],
    pending: Vec<RemotePath>,
}

impl<'a> Walk<'a> {
    /// Start a walk at `root`. Resets the limits.
    pub fn new(
        conn: &'a dyn FileConnection,
        root: &RemotePath,
        filters: &'a [&'a dyn FileFilter],
        limits: &'a mut [Box<dyn FileLimit>],
    ) -> Self {
        reset_limits(&mut *limits);
        Walk {
            conn,
            filters,
            limits,
            pending: vec![root.resolve()],
        }
    }
}

impl fmt::Debug for Walk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Walk")
            .field("instance", &self.conn.instance_url())
            .field("filters", &self.filters)
            .field("limits", &self.limits)
            .field("pending", &self.pending)
            .finish()
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<WalkEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if limits_reached(&*self.limits) {
            self.pending.clear();
            return None;
        }
        let root = self.pending.pop()?;
        debug!("Walking through directory '{}'", root);

        let entries = match self.conn.list_dir(&root) {
            Ok(entries) => entries,
            Err(e) => {
                self.pending.clear();
                return Some(Err(e));
            }
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in entries {
            if !match_all_filters(self.filters, &entry) {
                continue;
            }
            let reached = limits_stop_at(&mut *self.limits, &entry);
            if entry.is_dir() {
                dirs.push(entry);
            } else {
                files.push(entry);
            }
            if reached {
                break;
            }
        }

        // Stack order: the first listed directory is visited next
        self.pending.extend(dirs.iter().rev().map(|dir| dir.path.clone()));
        debug!(
            "Directory '{}' contains {} nested directories and {} files",
            root,
            dirs.len(),
            files.len()
        );
        Some(Ok(WalkEntry { root, dirs, files }))
    }
}

/// Walk a connection held as a trait object.
pub fn walk<'a>(
    conn: &'a dyn FileConnection,
    root: &RemotePath,
    filters: &'a [&'a dyn FileFilter],
    limits: &'a mut [Box<dyn FileLimit>],
) -> Walk<'a> {
    Walk::new(conn, root, filters, limits)
}
