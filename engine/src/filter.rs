//! File filters.
//!
//! A filter decides whether a listed entry takes part in a transfer. Filters
//! see both directories and files during a walk: a rejected directory is not
//! descended into, a rejected file is not yielded. Several filters combine
//! with AND semantics.

use regex::Regex;
use serde::Deserialize;
use std::fmt;

use crate::error::{EngineError, Result};
use crate::hwm::FileHwm;
use crate::model::RemoteFile;
use crate::path::RemotePath;

/// Predicate over a listed entry.
pub trait FileFilter: fmt::Debug + Send + Sync {
    /// Returns true if the entry should be kept.
    fn matches(&self, entry: &RemoteFile) -> bool;

    /// Human-readable description for the run log.
    fn describe(&self) -> String;
}

/// True if every filter accepts the entry.
pub fn match_all_filters(filters: &[&dyn FileFilter], entry: &RemoteFile) -> bool {
    filters.iter().all(|filter| filter.matches(entry))
}

/// Keeps files whose name matches a glob pattern, e.g. `*.csv`.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    pattern: glob::Pattern,
}

impl GlobFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| EngineError::InvalidOption {
            option: "glob",
            reason: e.to_string(),
        })?;
        Ok(GlobFilter { pattern })
    }
}

impl FileFilter for GlobFilter {
    fn matches(&self, entry: &RemoteFile) -> bool {
        // Directories have to pass, otherwise nested matching files are never reached
        entry.is_dir() || self.pattern.matches(entry.path.name())
    }

    fn describe(&self) -> String {
        format!("glob = '{}'", self.pattern.as_str())
    }
}

/// Keeps files whose full path matches a regular expression.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    regex: Regex,
}

impl RegexFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| EngineError::InvalidOption {
            option: "regexp_pattern",
            reason: e.to_string(),
        })?;
        Ok(RegexFilter { regex })
    }
}

impl FileFilter for RegexFilter {
    fn matches(&self, entry: &RemoteFile) -> bool {
        entry.is_dir() || self.regex.is_match(entry.path.as_str())
    }

    fn describe(&self) -> String {
        format!("regexp_pattern = '{}'", self.regex.as_str())
    }
}

/// Rejects the listed directories and everything below them.
#[derive(Debug, Clone)]
pub struct ExcludeDirsFilter {
    dirs: Vec<RemotePath>,
}

impl ExcludeDirsFilter {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<RemotePath>,
    {
        ExcludeDirsFilter {
            dirs: dirs.into_iter().map(|d| d.into().resolve()).collect(),
        }
    }
}

impl FileFilter for ExcludeDirsFilter {
    fn matches(&self, entry: &RemoteFile) -> bool {
        let path = entry.path.resolve();
        !self.dirs.iter().any(|dir| path.starts_with(dir))
    }

    fn describe(&self) -> String {
        let dirs: Vec<String> = self.dirs.iter().map(|d| format!("'{}'", d)).collect();
        format!("exclude_dirs = [{}]", dirs.join(", "))
    }
}

/// Rejects files already covered by a watermark.
#[derive(Debug, Clone)]
pub struct FileHwmFilter {
    hwm: FileHwm,
}

impl FileHwmFilter {
    pub fn new(hwm: FileHwm) -> Self {
        FileHwmFilter { hwm }
    }
}

impl FileFilter for FileHwmFilter {
    fn matches(&self, entry: &RemoteFile) -> bool {
        entry.is_dir() || !self.hwm.covers(entry)
    }

    fn describe(&self) -> String {
        format!("hwm = '{}'", self.hwm.qualified_name())
    }
}

/// Filter settings as they appear in configuration files.
///
/// ```toml
/// [[filters]]
/// type = "glob"
/// pattern = "*.csv"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    Glob { pattern: String },
    Regexp { pattern: String },
    ExcludeDirs { dirs: Vec<RemotePath> },
}

impl FilterConfig {
    /// Instantiate the configured filter.
    pub fn build(&self) -> Result<Box<dyn FileFilter>> {
        Ok(match self {
            FilterConfig::Glob { pattern } => Box::new(GlobFilter::new(pattern)?),
            FilterConfig::Regexp { pattern } => Box::new(RegexFilter::new(pattern)?),
            FilterConfig::ExcludeDirs { dirs } => Box::new(ExcludeDirsFilter::new(dirs.clone())),
        })
    }
}
