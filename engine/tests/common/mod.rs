//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use transfer_engine::connection::{Capabilities, ConnectionParams, FileConnection, LocalFsConnection};
use transfer_engine::{FileHwm, FsError, HwmStore, LocalPath, RemoteFile, RemotePath, StoreError};

/// A remote tree served by a `LocalFsConnection`, plus a local directory.
pub struct Fixture {
    pub remote: TempDir,
    pub local: TempDir,
    pub connection: Arc<LocalFsConnection>,
}

impl Fixture {
    pub fn new() -> Self {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        let connection =
            Arc::new(LocalFsConnection::new(remote.path()).expect("Failed to open connection"));
        Fixture {
            remote,
            local,
            connection,
        }
    }

    /// Create a file in the remote tree. `path` is relative to the remote root.
    pub fn remote_file(&self, path: &str, content: &str) {
        write_file(&self.remote.path().join(path), content);
    }

    /// Create a file in the local directory.
    pub fn local_file(&self, path: &str, content: &str) {
        write_file(&self.local.path().join(path), content);
    }

    pub fn remote_dir(&self, path: &str) {
        fs::create_dir_all(self.remote.path().join(path)).expect("Failed to create dir");
    }

    pub fn read_local(&self, path: &str) -> String {
        fs::read_to_string(self.local.path().join(path)).expect("Failed to read file")
    }

    pub fn read_remote(&self, path: &str) -> String {
        fs::read_to_string(self.remote.path().join(path)).expect("Failed to read file")
    }

    /// Destination under the local root, as reported in a result.
    pub fn local_path(&self, path: &str) -> LocalPath {
        self.local_root().join(path)
    }

    pub fn local_root(&self) -> LocalPath {
        LocalPath::new(self.local.path()).resolve()
    }

    /// Set the modification time of a remote file, in seconds after a fixed base.
    pub fn set_remote_mtime(&self, path: &str, offset_secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + offset_secs);
        filetime::set_file_mtime(
            self.remote.path().join(path),
            filetime::FileTime::from_system_time(time),
        )
        .expect("Failed to set mtime");
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create dirs");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Sorted string form of a set of paths.
pub fn sorted<T: ToString>(items: impl IntoIterator<Item = T>) -> Vec<String> {
    let mut items: Vec<String> = items.into_iter().map(|item| item.to_string()).collect();
    items.sort();
    items
}

/// How a `FaultyConnection` breaks a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `fetch_file` returns an I/O error without writing anything
    Error,
    /// `fetch_file` writes half of the content and reports success
    Truncate,
}

/// Wraps a `LocalFsConnection` and breaks downloads of chosen files.
pub struct FaultyConnection {
    inner: LocalFsConnection,
    fault: Fault,
    broken: Mutex<HashSet<String>>,
}

impl FaultyConnection {
    pub fn new(inner: LocalFsConnection, fault: Fault) -> Self {
        FaultyConnection {
            inner,
            fault,
            broken: Mutex::new(HashSet::new()),
        }
    }

    /// Break downloads of the remote file at `path`.
    pub fn break_file(&self, path: &str) {
        self.broken
            .lock()
            .expect("Failed to lock")
            .insert(RemotePath::new(path).resolve().to_string());
    }

    fn is_broken(&self, path: &RemotePath) -> bool {
        self.broken
            .lock()
            .expect("Failed to lock")
            .contains(&path.resolve().to_string())
    }
}

impl FileConnection for FaultyConnection {
    fn params(&self) -> &ConnectionParams {
        self.inner.params()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn path_exists(&self, path: &RemotePath) -> Result<bool, FsError> {
        self.inner.path_exists(path)
    }

    fn stat_path(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        self.inner.stat_path(path)
    }

    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteFile>, FsError> {
        self.inner.list_entries(path)
    }

    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, FsError> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), FsError> {
        self.inner.write_file(path, content)
    }

    fn fetch_file(&self, remote: &RemotePath, local: &LocalPath) -> Result<(), FsError> {
        if !self.is_broken(remote) {
            return self.inner.fetch_file(remote, local);
        }
        match self.fault {
            Fault::Error => Err(FsError::io(
                remote,
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"),
            )),
            Fault::Truncate => {
                let content = self.inner.read_file(remote)?;
                fs::write(local, &content[..content.len() / 2]).map_err(|e| FsError::io(local, e))
            }
        }
    }

    fn put_file(&self, local: &LocalPath, remote: &RemotePath) -> Result<(), FsError> {
        self.inner.put_file(local, remote)
    }

    fn delete_file(&self, path: &RemotePath) -> Result<(), FsError> {
        self.inner.delete_file(path)
    }

    fn move_path(&self, source: &RemotePath, target: &RemotePath) -> Result<(), FsError> {
        self.inner.move_path(source, target)
    }

    fn create_dir(&self, path: &RemotePath) -> Result<(), FsError> {
        self.inner.create_dir(path)
    }

    fn delete_empty_dir(&self, path: &RemotePath) -> Result<(), FsError> {
        self.inner.delete_empty_dir(path)
    }
}

/// A store that can read but refuses every save.
#[derive(Debug, Default)]
pub struct FailingStore {
    pub attempts: Mutex<usize>,
}

impl HwmStore for FailingStore {
    fn get(&self, _qualified_name: &str) -> Result<Option<FileHwm>, StoreError> {
        Ok(None)
    }

    fn save(&self, _hwm: &FileHwm) -> Result<(), StoreError> {
        *self.attempts.lock().expect("Failed to lock") += 1;
        Err(StoreError::Backend("store is read-only".to_string()))
    }

    fn store_type(&self) -> &'static str {
        "failing"
    }
}
