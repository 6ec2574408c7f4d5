//! A local directory served as a file connection.
//!
//! The remote namespace `/` maps to the configured root directory, so a
//! mounted share (NFS, SMB) can be handled like any other remote source.

use std::fs;
use std::path::{Path, PathBuf};

use super::{Capabilities, ConnectionParams, FileConnection};
use crate::error::FsError;
use crate::fs_ops;
use crate::model::{PathStat, RemoteFile};
use crate::path::{LocalPath, PathLike, RemotePath};

/// File connection backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalFsConnection {
    root: PathBuf,
    params: ConnectionParams,
    capabilities: Capabilities,
}

impl LocalFsConnection {
    /// Serve `root` as the remote `/`.
    ///
    /// # Errors
    /// Returns `FsError::NotFound` or `FsError::NotADirectory` if `root` is
    /// not an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = LocalPath::new(root.as_ref()).resolve();
        let metadata = fs::metadata(&root).map_err(|e| FsError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory {
                path: root.to_string(),
            });
        }

        let params = ConnectionParams::new("file", "localhost").with_root(root.to_posix_string());
        Ok(LocalFsConnection {
            root: root.into(),
            params,
            capabilities: Capabilities::full(),
        })
    }

    /// Restrict the operations this connection reports as supported.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local location of a remote path.
    pub fn local_path(&self, path: &RemotePath) -> PathBuf {
        let mut local = self.root.clone();
        for part in path.resolve().components() {
            local.push(part);
        }
        local
    }

    fn entry(&self, path: &RemotePath, metadata: &fs::Metadata) -> RemoteFile {
        let stat = PathStat::from_metadata(metadata);
        if metadata.is_dir() {
            RemoteFile::directory(path.clone(), stat)
        } else {
            RemoteFile::file(path.clone(), stat)
        }
    }
}

impl FileConnection for LocalFsConnection {
    fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn path_exists(&self, path: &RemotePath) -> Result<bool, FsError> {
        Ok(self.local_path(path).exists())
    }

    fn stat_path(&self, path: &RemotePath) -> Result<RemoteFile, FsError> {
        let local = self.local_path(path);
        let metadata = fs::metadata(&local).map_err(|e| FsError::io(path, e))?;
        Ok(self.entry(&path.resolve(), &metadata))
    }

    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteFile>, FsError> {
        let dir = path.resolve();
        let local = self.local_path(&dir);
        let entries = fs::read_dir(&local).map_err(|e| FsError::io(&dir, e))?;

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = dir.join(&name);
            // Follows file symlinks like a mounted share would, directory
            // symlinks are left out so a link cycle cannot be walked forever
            let metadata = fs_ops::entry_metadata(&entry.path()).map_err(|e| FsError::io(&child, e))?;
            if let Some(metadata) = metadata {
                result.push(self.entry(&child, &metadata));
            }
        }
        result.sort();
        Ok(result)
    }

    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, FsError> {
        fs::read(self.local_path(path)).map_err(|e| FsError::io(path, e))
    }

    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), FsError> {
        self.capabilities.require("write", &self.params.instance_url())?;
        fs::write(self.local_path(path), content).map_err(|e| FsError::io(path, e))
    }

    fn fetch_file(&self, remote: &RemotePath, local: &LocalPath) -> Result<(), FsError> {
        self.capabilities.require("read", &self.params.instance_url())?;
        fs_ops::copy_file_with_metadata(&self.local_path(remote), local.as_path()).map(|_| ())
    }

    fn put_file(&self, local: &LocalPath, remote: &RemotePath) -> Result<(), FsError> {
        self.capabilities.require("write", &self.params.instance_url())?;
        fs_ops::copy_file_with_metadata(local.as_path(), &self.local_path(remote)).map(|_| ())
    }

    fn delete_file(&self, path: &RemotePath) -> Result<(), FsError> {
        self.capabilities.require("write", &self.params.instance_url())?;
        fs::remove_file(self.local_path(path)).map_err(|e| FsError::io(path, e))
    }

    fn move_path(&self, source: &RemotePath, target: &RemotePath) -> Result<(), FsError> {
        self.capabilities.require("rename", &self.params.instance_url())?;
        fs::rename(self.local_path(source), self.local_path(target))
            .map_err(|e| FsError::io(source, e))
    }

    fn create_dir(&self, path: &RemotePath) -> Result<(), FsError> {
        self.capabilities.require("write", &self.params.instance_url())?;
        fs::create_dir_all(self.local_path(path)).map_err(|e| FsError::io(path, e))
    }

    fn delete_empty_dir(&self, path: &RemotePath) -> Result<(), FsError> {
        self.capabilities.require("write", &self.params.instance_url())?;
        fs::remove_dir(self.local_path(path)).map_err(|e| FsError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::walk;
    use crate::filter::{ExcludeDirsFilter, FileFilter, GlobFilter};
    use crate::limit::{FileLimit, MaxFilesCount};
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalFsConnection) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join("data/sub")).expect("Failed to create dirs");
        fs::create_dir_all(dir.path().join("data/skip")).expect("Failed to create dirs");
        fs::write(dir.path().join("data/a.csv"), b"aaa").expect("Failed to write file");
        fs::write(dir.path().join("data/b.txt"), b"bb").expect("Failed to write file");
        fs::write(dir.path().join("data/sub/c.csv"), b"c").expect("Failed to write file");
        fs::write(dir.path().join("data/skip/d.csv"), b"d").expect("Failed to write file");
        let conn = LocalFsConnection::new(dir.path()).expect("Failed to open connection");
        (dir, conn)
    }

    fn walked_files(conn: &LocalFsConnection, filters: &[&dyn FileFilter], limits: &mut [Box<dyn FileLimit>]) -> Vec<String> {
        walk(conn, &RemotePath::new("/data"), filters, limits)
            .map(|entry| entry.expect("Failed to walk"))
            .flat_map(|entry| entry.files.into_iter().map(|f| f.path.to_string()))
            .collect()
    }

    #[test]
    fn test_stat_and_checks() {
        let (_dir, conn) = setup();
        conn.check().expect("Connection should be available");

        let file = conn.get_file(&RemotePath::new("/data/a.csv")).expect("Failed to stat");
        assert_eq!(file.stat.size, 3);
        assert!(conn.is_dir(&RemotePath::new("/data")).expect("Failed to stat"));
        assert!(matches!(
            conn.get_file(&RemotePath::new("/data/sub")),
            Err(FsError::NotAFile { .. })
        ));
        assert!(matches!(
            conn.get_stat(&RemotePath::new("/nope")),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_dir_is_sorted_with_full_paths() {
        let (_dir, conn) = setup();
        let names: Vec<String> = conn
            .list_dir(&RemotePath::new("/data"))
            .expect("Failed to list")
            .into_iter()
            .map(|e| e.path.to_string())
            .collect();
        assert_eq!(names, vec!["/data/a.csv", "/data/b.txt", "/data/skip", "/data/sub"]);
    }

    #[test]
    fn test_walk_applies_filters() {
        let (_dir, conn) = setup();
        let glob = GlobFilter::new("*.csv").expect("Failed to build filter");
        let exclude = ExcludeDirsFilter::new(["/data/skip"]);
        let filters: Vec<&dyn FileFilter> = vec![&glob, &exclude];

        let files = walked_files(&conn, &filters, &mut []);
        assert_eq!(files, vec!["/data/a.csv", "/data/sub/c.csv"]);
    }

    #[test]
    fn test_walk_stops_at_limit() {
        let (_dir, conn) = setup();
        let mut limits: Vec<Box<dyn FileLimit>> = vec![Box::new(MaxFilesCount::new(2))];

        let files = walked_files(&conn, &[], &mut limits);
        assert_eq!(files, vec!["/data/a.csv", "/data/b.txt"]);
        assert!(limits[0].is_reached());

        // A new walk starts from scratch
        let files = walked_files(&conn, &[], &mut limits);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_download_verifies_and_respects_replace() {
        let (dir, conn) = setup();
        let local = LocalPath::new(dir.path().join("out/a.csv"));

        let file = conn
            .download_file(&RemotePath::new("/data/a.csv"), &local, false)
            .expect("Failed to download");
        assert_eq!(file.stat.size, 3);

        let again = conn.download_file(&RemotePath::new("/data/a.csv"), &local, false);
        assert!(matches!(again, Err(FsError::AlreadyExists { .. })));
        conn.download_file(&RemotePath::new("/data/a.csv"), &local, true)
            .expect("Failed to overwrite");
    }

    #[test]
    fn test_upload_rename_and_remove() {
        let (dir, conn) = setup();
        let local = LocalPath::new(dir.path().join("upload.bin"));
        fs::write(&local, b"12345").expect("Failed to write file");

        let uploaded = conn
            .upload_file(&local, &RemotePath::new("/target/nested/u.bin"), false)
            .expect("Failed to upload");
        assert_eq!(uploaded.stat.size, 5);

        let renamed = conn
            .rename_file(&uploaded.path, &RemotePath::new("/target/u.bin"), false)
            .expect("Failed to rename");
        assert_eq!(renamed.path.as_str(), "/target/u.bin");

        conn.remove_file(&renamed.path).expect("Failed to remove");
        conn.remove_file(&renamed.path).expect("Removing a missing file is fine");
        assert!(!dir.path().join("target/u.bin").exists());
    }

    #[test]
    fn test_rmdir_requires_recursive_for_content() {
        let (dir, conn) = setup();
        let result = conn.rmdir(&RemotePath::new("/data"), false);
        assert!(matches!(result, Err(FsError::DirectoryNotEmpty { .. })));

        conn.rmdir(&RemotePath::new("/data"), true).expect("Failed to remove");
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_read_only_connection_refuses_writes() {
        let (_dir, conn) = setup();
        let conn = conn.with_capabilities(Capabilities::read_only());

        let result = conn.write_text(&RemotePath::new("/data/new.txt"), "x");
        assert!(matches!(result, Err(FsError::Unsupported { .. })));
        assert_eq!(
            conn.read_text(&RemotePath::new("/data/b.txt")).expect("Failed to read"),
            "bb"
        );
    }
}
