//! High-water marks for file transfers.
//!
//! A file watermark remembers what has already been transferred from one
//! remote folder of one connection. Two kinds exist:
//! - `file_list`: the set of processed paths, relative to the folder
//! - `file_modified_time`: the greatest modification time seen, plus the
//!   paths sharing exactly that time
//!
//! Watermarks only move forward. `update` and `merge` never drop a path or
//! lower a timestamp, which is what makes re-runs after a crash safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::model::RemoteFile;
use crate::path::RemotePath;

/// Watermark kinds known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HwmKind {
    FileList,
    FileModifiedTime,
}

impl HwmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwmKind::FileList => "file_list",
            HwmKind::FileModifiedTime => "file_modified_time",
        }
    }
}

impl fmt::Display for HwmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HwmKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_list" => Ok(HwmKind::FileList),
            "file_modified_time" => Ok(HwmKind::FileModifiedTime),
            other => Err(EngineError::InvalidOption {
                option: "hwm_type",
                reason: format!(
                    "unknown watermark kind '{}', expected one of: file_list, file_modified_time",
                    other
                ),
            }),
        }
    }
}

/// The folder a watermark is scoped to: a remote path on one connection instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub name: RemotePath,
    pub instance: String,
}

impl RemoteFolder {
    pub fn new(name: RemotePath, instance: impl Into<String>) -> Self {
        RemoteFolder {
            name: name.resolve(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for RemoteFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.instance)
    }
}

/// Watermark payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HwmValue {
    FileList { files: BTreeSet<String> },
    FileModifiedTime {
        latest: Option<DateTime<Utc>>,
        /// Paths already handled whose mtime equals `latest`
        #[serde(default)]
        at_latest: BTreeSet<String>,
    },
}

impl HwmValue {
    fn empty(kind: HwmKind) -> Self {
        match kind {
            HwmKind::FileList => HwmValue::FileList {
                files: BTreeSet::new(),
            },
            HwmKind::FileModifiedTime => HwmValue::FileModifiedTime {
                latest: None,
                at_latest: BTreeSet::new(),
            },
        }
    }

    pub fn kind(&self) -> HwmKind {
        match self {
            HwmValue::FileList { .. } => HwmKind::FileList,
            HwmValue::FileModifiedTime { .. } => HwmKind::FileModifiedTime,
        }
    }
}

/// A file watermark bound to a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHwm {
    pub source: RemoteFolder,
    pub value: HwmValue,
    /// When the value last moved
    pub modified_time: DateTime<Utc>,
}

impl FileHwm {
    /// Create an empty watermark of the given kind.
    pub fn new(kind: HwmKind, source: RemoteFolder) -> Self {
        FileHwm {
            source,
            value: HwmValue::empty(kind),
            modified_time: Utc::now(),
        }
    }

    pub fn kind(&self) -> HwmKind {
        self.value.kind()
    }

    /// Store key of the watermark: `{kind}#{folder}@{instance}`.
    ///
    /// Two watermarks with the same name describe the same state and are
    /// expected to be comparable.
    pub fn qualified_name(&self) -> String {
        format!("{}#{}", self.kind(), self.source)
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            HwmValue::FileList { files } => files.is_empty(),
            HwmValue::FileModifiedTime { latest, .. } => latest.is_none(),
        }
    }

    /// Processed paths of a `file_list` watermark, empty for other kinds.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        let files = match &self.value {
            HwmValue::FileList { files } => Some(files),
            HwmValue::FileModifiedTime { .. } => None,
        };
        files.into_iter().flatten().map(String::as_str)
    }

    /// Key under which a path is remembered: relative to the folder when it
    /// lives below it, the absolute path otherwise.
    fn entry_key(&self, path: &RemotePath) -> String {
        let path = path.resolve();
        match path.relative_to(&self.source.name) {
            Ok(rel) if rel.as_str() != "." => rel.as_str().to_string(),
            _ => path.as_str().to_string(),
        }
    }

    /// True if the file was already handled according to this watermark.
    pub fn covers(&self, file: &RemoteFile) -> bool {
        match &self.value {
            HwmValue::FileList { files } => files.contains(&self.entry_key(&file.path)),
            HwmValue::FileModifiedTime { latest, at_latest } => match (file.stat.mtime, latest) {
                (Some(mtime), Some(latest)) => match mtime.cmp(latest) {
                    Ordering::Less => true,
                    Ordering::Equal => at_latest.contains(&self.entry_key(&file.path)),
                    Ordering::Greater => false,
                },
                // Without an mtime the file cannot be placed, so it is never covered
                _ => false,
            },
        }
    }

    /// Advance the watermark past a transferred file.
    ///
    /// Returns true if the value moved.
    pub fn update(&mut self, file: &RemoteFile) -> bool {
        let key = self.entry_key(&file.path);
        let moved = match &mut self.value {
            HwmValue::FileList { files } => files.insert(key),
            HwmValue::FileModifiedTime { latest, at_latest } => match (file.stat.mtime, *latest) {
                (Some(mtime), Some(current)) if mtime == current => at_latest.insert(key),
                (Some(mtime), current) if current.map_or(true, |current| mtime > current) => {
                    *latest = Some(mtime);
                    *at_latest = BTreeSet::from([key]);
                    true
                }
                _ => false,
            },
        };
        if moved {
            self.modified_time = Utc::now();
        }
        moved
    }

    /// Fold another watermark of the same kind into this one.
    ///
    /// Watermarks of another kind are ignored. Returns true if the value moved.
    pub fn merge(&mut self, other: &FileHwm) -> bool {
        let moved = match (&mut self.value, &other.value) {
            (HwmValue::FileList { files }, HwmValue::FileList { files: theirs }) => {
                let before = files.len();
                files.extend(theirs.iter().cloned());
                files.len() != before
            }
            (
                HwmValue::FileModifiedTime { latest, at_latest },
                HwmValue::FileModifiedTime {
                    latest: Some(theirs),
                    at_latest: their_paths,
                },
            ) => match latest.map(|current| theirs.cmp(&current)) {
                None | Some(Ordering::Greater) => {
                    *latest = Some(*theirs);
                    *at_latest = their_paths.clone();
                    true
                }
                Some(Ordering::Equal) => {
                    let before = at_latest.len();
                    at_latest.extend(their_paths.iter().cloned());
                    at_latest.len() != before
                }
                Some(Ordering::Less) => false,
            },
            _ => false,
        };
        if moved {
            self.modified_time = self.modified_time.max(other.modified_time);
        }
        moved
    }

    /// Partial order of two watermark values.
    ///
    /// `file_list` values are ordered by inclusion, so two lists that each
    /// contain a path the other lacks are incomparable. `file_modified_time`
    /// values are ordered by time, then by inclusion of the paths at that
    /// time. Values of different kinds are never comparable.
    pub fn compare(&self, other: &FileHwm) -> Option<Ordering> {
        match (&self.value, &other.value) {
            (HwmValue::FileList { files: a }, HwmValue::FileList { files: b }) => inclusion(a, b),
            (
                HwmValue::FileModifiedTime {
                    latest: a,
                    at_latest: a_paths,
                },
                HwmValue::FileModifiedTime {
                    latest: b,
                    at_latest: b_paths,
                },
            ) => match a.cmp(b) {
                Ordering::Equal => inclusion(a_paths, b_paths),
                order => Some(order),
            },
            _ => None,
        }
    }
}

fn inclusion(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<Ordering> {
    if a == b {
        Some(Ordering::Equal)
    } else if a.is_subset(b) {
        Some(Ordering::Less)
    } else if a.is_superset(b) {
        Some(Ordering::Greater)
    } else {
        None
    }
}

impl fmt::Display for FileHwm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            HwmValue::FileList { files } => {
                write!(f, "{} ({} files)", self.qualified_name(), files.len())
            }
            HwmValue::FileModifiedTime {
                latest: Some(latest),
                ..
            } => {
                write!(f, "{} (latest = {})", self.qualified_name(), latest.to_rfc3339())
            }
            HwmValue::FileModifiedTime { latest: None, .. } => {
                write!(f, "{} (empty)", self.qualified_name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathStat;
    use chrono::TimeZone;

    fn folder() -> RemoteFolder {
        RemoteFolder::new(RemotePath::new("/remote"), "sftp://host:22")
    }

    fn file(path: &str, mtime_secs: Option<i64>) -> RemoteFile {
        let mtime = mtime_secs.and_then(|s| Utc.timestamp_opt(s, 0).single());
        RemoteFile::file(RemotePath::new(path), PathStat::new(1, mtime))
    }

    #[test]
    fn test_qualified_name() {
        let hwm = FileHwm::new(HwmKind::FileList, folder());
        assert_eq!(hwm.qualified_name(), "file_list#/remote@sftp://host:22");
    }

    #[test]
    fn test_kind_registry() {
        assert_eq!("file_list".parse::<HwmKind>().unwrap(), HwmKind::FileList);
        assert_eq!(
            "file_modified_time".parse::<HwmKind>().unwrap(),
            HwmKind::FileModifiedTime
        );
        assert!("column_int".parse::<HwmKind>().is_err());
    }

    #[test]
    fn test_file_list_update_and_covers() {
        let mut hwm = FileHwm::new(HwmKind::FileList, folder());
        let a = file("/remote/sub/a.csv", None);

        assert!(!hwm.covers(&a));
        assert!(hwm.update(&a));
        assert!(!hwm.update(&a));
        assert!(hwm.covers(&a));
        assert_eq!(hwm.files().collect::<Vec<_>>(), vec!["sub/a.csv"]);
    }

    #[test]
    fn test_modified_time_never_goes_back() {
        let mut hwm = FileHwm::new(HwmKind::FileModifiedTime, folder());
        assert!(hwm.update(&file("/remote/a", Some(200))));
        assert!(!hwm.update(&file("/remote/b", Some(100))));

        assert!(hwm.covers(&file("/remote/c", Some(150))));
        assert!(!hwm.covers(&file("/remote/d", Some(300))));
        assert!(!hwm.covers(&file("/remote/e", None)));
    }

    #[test]
    fn test_modified_time_tracks_files_sharing_latest_time() {
        let mut hwm = FileHwm::new(HwmKind::FileModifiedTime, folder());
        assert!(hwm.update(&file("/remote/a", Some(200))));
        let before = hwm.clone();

        // Same timestamp, different file: not handled yet
        let twin = file("/remote/b", Some(200));
        assert!(hwm.covers(&file("/remote/a", Some(200))));
        assert!(!hwm.covers(&twin));

        assert!(hwm.update(&twin));
        assert!(!hwm.update(&twin));
        assert!(hwm.covers(&twin));
        assert_eq!(hwm.compare(&before), Some(Ordering::Greater));

        // A newer time resets the set
        assert!(hwm.update(&file("/remote/c", Some(300))));
        assert!(!hwm.covers(&file("/remote/d", Some(300))));
        assert!(hwm.covers(&twin));
    }

    #[test]
    fn test_modified_time_merge() {
        let mut left = FileHwm::new(HwmKind::FileModifiedTime, folder());
        left.update(&file("/remote/a", Some(100)));
        let mut right = FileHwm::new(HwmKind::FileModifiedTime, folder());
        right.update(&file("/remote/b", Some(100)));

        assert_eq!(left.compare(&right), None);
        assert!(left.merge(&right));
        assert!(left.covers(&file("/remote/a", Some(100))));
        assert!(left.covers(&file("/remote/b", Some(100))));

        let mut newer = FileHwm::new(HwmKind::FileModifiedTime, folder());
        newer.update(&file("/remote/c", Some(150)));
        assert!(left.merge(&newer));
        assert_eq!(left.compare(&newer), Some(Ordering::Equal));
        assert!(!left.merge(&right));
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut left = FileHwm::new(HwmKind::FileList, folder());
        left.update(&file("/remote/a", None));
        let mut right = FileHwm::new(HwmKind::FileList, folder());
        right.update(&file("/remote/b", None));

        assert_eq!(left.compare(&right), None);
        let before = left.clone();
        assert!(left.merge(&right));
        assert_eq!(before.compare(&left), Some(Ordering::Less));
        assert_eq!(right.compare(&left), Some(Ordering::Less));
        assert!(!left.merge(&before));
    }

    #[test]
    fn test_merge_ignores_other_kind() {
        let mut list = FileHwm::new(HwmKind::FileList, folder());
        let mut time = FileHwm::new(HwmKind::FileModifiedTime, folder());
        time.update(&file("/remote/a", Some(10)));

        assert!(!list.merge(&time));
        assert!(list.is_empty());
        assert_eq!(list.compare(&time), None);
    }

    #[test]
    fn test_serde_roundtrip_keeps_kind() {
        let mut hwm = FileHwm::new(HwmKind::FileList, folder());
        hwm.update(&file("/remote/a.csv", None));

        let json = serde_json::to_string(&hwm).expect("Failed to serialize");
        assert!(json.contains("\"kind\":\"file_list\""));
        let back: FileHwm = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, hwm);
    }
}
