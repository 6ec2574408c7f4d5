//! Typed path model.
//!
//! Two disjoint path types are used throughout the engine:
//! - `RemotePath`: a POSIX-style path inside a file connection's namespace
//! - `LocalPath`: a path on the machine running the engine
//!
//! Neither converts into the other, so a local staging path can never be
//! handed to a remote client call (or the other way round) by accident.
//! Both are normalized on construction: `.` components and duplicate
//! separators are dropped and `..` is folded lexically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors from path arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// `relative_to` was called with a base that is not a prefix of the path
    #[error("'{path}' is not relative to '{base}'")]
    NotRelative { path: String, base: String },
}

/// Operations the transfer engine needs from both path types.
///
/// Relative fragments are exchanged as `/`-separated strings, which is how a
/// source-relative path is re-rooted under a destination of the other kind.
pub trait PathLike:
    Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn is_absolute(&self) -> bool;

    /// Last path component, if any.
    fn file_name(&self) -> Option<String>;

    /// Join a `/`-separated relative fragment.
    fn join_relative(&self, relative: &str) -> Self;

    /// `/`-separated remainder of `self` below `base`, if `base` is a strict parent.
    fn strip_parent(&self, base: &Self) -> Option<String>;

    /// The whole path as a `/`-separated string.
    fn to_posix_string(&self) -> String;
}

/// A path on a file connection (FTP, HDFS, SFTP, a mounted share...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a normalized remote path.
    pub fn new(path: impl AsRef<str>) -> Self {
        RemotePath(normalize_posix(path.as_ref()))
    }

    /// The `/` root.
    pub fn root() -> Self {
        RemotePath("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Anchor a relative path at `/`. Absolute paths are returned as is.
    pub fn resolve(&self) -> Self {
        if self.is_absolute() {
            self.clone()
        } else {
            RemotePath::new(format!("/{}", self.0))
        }
    }

    /// Join another path. An absolute `other` replaces `self`, like `Path::join`.
    pub fn join(&self, other: impl AsRef<str>) -> Self {
        let other = other.as_ref();
        if other.starts_with('/') {
            return RemotePath::new(other);
        }
        if self.0 == "." {
            return RemotePath::new(other);
        }
        RemotePath::new(format!("{}/{}", self.0, other))
    }

    /// Path components, root excluded.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty() && *c != ".")
    }

    /// Last component, or an empty string for `/` and `.`.
    pub fn name(&self) -> &str {
        self.components().last().unwrap_or("")
    }

    pub fn parent(&self) -> Option<RemotePath> {
        let parts: Vec<&str> = self.components().collect();
        if parts.is_empty() {
            return None;
        }
        let parent = parts[..parts.len() - 1].join("/");
        if self.is_absolute() {
            Some(RemotePath::new(format!("/{}", parent)))
        } else if parent.is_empty() {
            Some(RemotePath::new("."))
        } else {
            Some(RemotePath::new(parent))
        }
    }

    /// True if `base` equals `self` or is one of its ancestors.
    pub fn starts_with(&self, base: &RemotePath) -> bool {
        if self.is_absolute() != base.is_absolute() {
            return false;
        }
        let mut own = self.components();
        base.components().all(|part| own.next() == Some(part))
    }

    /// Path of `self` relative to `base`.
    ///
    /// # Errors
    /// Returns `PathError::NotRelative` if `base` is not a prefix of `self`.
    pub fn relative_to(&self, base: &RemotePath) -> Result<RemotePath, PathError> {
        if !self.starts_with(base) {
            return Err(PathError::NotRelative {
                path: self.0.clone(),
                base: base.0.clone(),
            });
        }
        let skip = base.components().count();
        let rest: Vec<&str> = self.components().skip(skip).collect();
        if rest.is_empty() {
            Ok(RemotePath::new("."))
        } else {
            Ok(RemotePath::new(rest.join("/")))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemotePath {
    fn from(path: String) -> Self {
        RemotePath::new(path)
    }
}

impl From<&str> for RemotePath {
    fn from(path: &str) -> Self {
        RemotePath::new(path)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

impl PathLike for RemotePath {
    fn is_absolute(&self) -> bool {
        RemotePath::is_absolute(self)
    }

    fn file_name(&self) -> Option<String> {
        let name = self.name();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn join_relative(&self, relative: &str) -> Self {
        self.join(relative.trim_start_matches('/'))
    }

    fn strip_parent(&self, base: &Self) -> Option<String> {
        match self.relative_to(base) {
            Ok(rest) if rest.as_str() != "." => Some(rest.0),
            _ => None,
        }
    }

    fn to_posix_string(&self) -> String {
        self.0.clone()
    }
}

/// A path on the machine running the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "PathBuf", into = "PathBuf")]
pub struct LocalPath(PathBuf);

impl LocalPath {
    /// Create a lexically normalized local path. Does not touch the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalPath(normalize_local(&path.into()))
    }

    /// Make the path absolute and resolve symlinks where the path exists.
    ///
    /// Relative paths are anchored at the current directory. A path that does
    /// not exist yet is resolved through its parent, or only normalized
    /// lexically if the parent is missing too.
    pub fn resolve(&self) -> Self {
        let absolute = if self.0.is_absolute() {
            self.0.clone()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(&self.0),
                Err(_) => self.0.clone(),
            }
        };
        if let Ok(real) = std::fs::canonicalize(&absolute) {
            return LocalPath(real);
        }
        let lexical = LocalPath::new(absolute);
        match (lexical.0.parent(), lexical.0.file_name()) {
            (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
                Ok(real) => LocalPath(real.join(name)),
                Err(_) => lexical,
            },
            _ => lexical,
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.is_absolute()
    }

    pub fn join(&self, other: impl AsRef<Path>) -> Self {
        LocalPath::new(self.0.join(other))
    }

    pub fn parent(&self) -> Option<LocalPath> {
        self.0.parent().map(|p| LocalPath(p.to_path_buf()))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Path of `self` relative to `base`.
    ///
    /// # Errors
    /// Returns `PathError::NotRelative` if `base` is not a prefix of `self`.
    pub fn relative_to(&self, base: &LocalPath) -> Result<LocalPath, PathError> {
        self.0
            .strip_prefix(&base.0)
            .map(|rest| LocalPath(rest.to_path_buf()))
            .map_err(|_| PathError::NotRelative {
                path: self.0.display().to_string(),
                base: base.0.display().to_string(),
            })
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    pub fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.0.is_file()
    }
}

impl AsRef<Path> for LocalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for LocalPath {
    fn from(path: PathBuf) -> Self {
        LocalPath::new(path)
    }
}

impl From<&Path> for LocalPath {
    fn from(path: &Path) -> Self {
        LocalPath::new(path)
    }
}

impl From<&str> for LocalPath {
    fn from(path: &str) -> Self {
        LocalPath::new(path)
    }
}

impl From<LocalPath> for PathBuf {
    fn from(path: LocalPath) -> Self {
        path.0
    }
}

impl PathLike for LocalPath {
    fn is_absolute(&self) -> bool {
        LocalPath::is_absolute(self)
    }

    fn file_name(&self) -> Option<String> {
        self.name().map(str::to_string)
    }

    fn join_relative(&self, relative: &str) -> Self {
        let mut joined = self.0.clone();
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            joined.push(part);
        }
        LocalPath::new(joined)
    }

    fn strip_parent(&self, base: &Self) -> Option<String> {
        let rest = self.0.strip_prefix(&base.0).ok()?;
        let parts: Vec<String> = rest
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    fn to_posix_string(&self) -> String {
        let parts: Vec<String> = self
            .0
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::ParentDir => Some("..".to_string()),
                _ => None,
            })
            .collect();
        let joined = parts.join("/");
        if self.0.has_root() {
            format!("/{}", joined)
        } else {
            joined
        }
    }
}

fn normalize_posix(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `/..` is `/`
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn normalize_local(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_normal = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if ends_with_normal {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_is_normalized() {
        assert_eq!(RemotePath::new("/a//b/./c/").as_str(), "/a/b/c");
        assert_eq!(RemotePath::new("/a/b/../c").as_str(), "/a/c");
        assert_eq!(RemotePath::new("/..").as_str(), "/");
        assert_eq!(RemotePath::new("a/../..").as_str(), "..");
        assert_eq!(RemotePath::new("").as_str(), ".");
    }

    #[test]
    fn test_remote_path_decomposition() {
        let path = RemotePath::new("/remote/sub/b.txt");
        assert_eq!(path.name(), "b.txt");
        assert_eq!(path.parent(), Some(RemotePath::new("/remote/sub")));
        assert_eq!(RemotePath::new("/a").parent(), Some(RemotePath::root()));
        assert_eq!(RemotePath::root().parent(), None);
        assert!(path.is_absolute());
        assert!(!RemotePath::new("sub/b.txt").is_absolute());
    }

    #[test]
    fn test_remote_relative_to() {
        let path = RemotePath::new("/remote/sub/b.txt");
        let rel = path.relative_to(&RemotePath::new("/remote")).expect("Expected relative path");
        assert_eq!(rel.as_str(), "sub/b.txt");

        // A shared string prefix is not a path prefix
        let err = RemotePath::new("/remote2/a.txt").relative_to(&RemotePath::new("/remote"));
        assert!(matches!(err, Err(PathError::NotRelative { .. })));
    }

    #[test]
    fn test_remote_join_and_resolve() {
        let base = RemotePath::new("/remote");
        assert_eq!(base.join("a.txt").as_str(), "/remote/a.txt");
        assert_eq!(base.join("/other/a.txt").as_str(), "/other/a.txt");
        assert_eq!(RemotePath::new("x/y").resolve().as_str(), "/x/y");
    }

    #[test]
    fn test_strip_parent_requires_strict_parent() {
        let root = RemotePath::new("/remote");
        assert_eq!(
            RemotePath::new("/remote/sub/b.txt").strip_parent(&root),
            Some("sub/b.txt".to_string())
        );
        assert_eq!(root.strip_parent(&root), None);
    }

    #[test]
    fn test_local_path_is_normalized() {
        let path = LocalPath::new("/local/./sub/../a.txt");
        assert_eq!(path.as_path(), Path::new("/local/a.txt"));
        assert_eq!(path.name(), Some("a.txt"));
    }

    #[test]
    fn test_local_join_relative_and_strip() {
        let root = LocalPath::new("/local");
        let joined = root.join_relative("sub/b.txt");
        assert_eq!(joined.as_path(), Path::new("/local/sub/b.txt"));
        assert_eq!(joined.strip_parent(&root), Some("sub/b.txt".to_string()));
        assert_eq!(joined.to_posix_string(), "/local/sub/b.txt");
    }

    #[test]
    fn test_local_resolve_is_absolute() {
        let resolved = LocalPath::new("some/relative/dir").resolve();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_remote_path_serde_normalizes() {
        let path: RemotePath = serde_json::from_str("\"/a//b/\"").expect("Failed to parse");
        assert_eq!(path.as_str(), "/a/b");
    }
}
