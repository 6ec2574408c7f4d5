//! Job files.
//!
//! A job file holds the same settings as the command line flags, so a
//! recurring transfer can be described once and run from a scheduler:
//!
//! ```toml
//! remote_root = "/mnt/share"
//! hwm_store = "/var/lib/hwm-transfer"
//!
//! [download]
//! source_path = "/exports/daily"
//! local_path = "/data/incoming"
//! temp_path = "/data/tmp"
//! hwm = "file_list"
//! options = { mode = "ignore", delete_source = false }
//!
//! [[download.filters]]
//! type = "glob"
//! pattern = "*.csv"
//!
//! [[download.limits]]
//! type = "max_files_count"
//! count_limit = 1000
//! ```
//!
//! Flags given on the command line win over the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use transfer_engine::{FilterConfig, HwmKind, LimitConfig, TransferOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Local directory served as the remote `/`
    pub remote_root: Option<PathBuf>,

    /// Directory of the JSON watermark store
    pub hwm_store: Option<PathBuf>,

    pub download: DownloadConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    pub source_path: Option<String>,
    pub local_path: Option<PathBuf>,
    pub temp_path: Option<PathBuf>,
    pub filters: Vec<FilterConfig>,
    pub limits: Vec<LimitConfig>,
    pub hwm: Option<HwmKind>,
    pub options: TransferOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    pub local_path: Option<PathBuf>,
    pub target_path: Option<String>,
    pub temp_path: Option<String>,
    pub options: TransferOptions,
}

impl JobConfig {
    /// Read and parse a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid job file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: JobConfig = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use transfer_engine::FileWriteMode;

    #[test]
    fn test_parse_full_job_file() {
        let config = JobConfig::parse(
            r#"
            remote_root = "/mnt/share"
            hwm_store = "/var/lib/hwm"

            [download]
            source_path = "/exports"
            local_path = "/data/in"
            hwm = "file_modified_time"
            options = { mode = "delete_all", delete_source = true }

            [[download.filters]]
            type = "glob"
            pattern = "*.csv"

            [[download.filters]]
            type = "exclude_dirs"
            dirs = ["/exports/tmp"]

            [[download.limits]]
            type = "max_files_count"
            count_limit = 5

            [upload]
            target_path = "/imports"
            "#,
        )
        .expect("Failed to parse config");

        assert_eq!(config.remote_root, Some(PathBuf::from("/mnt/share")));
        assert_eq!(config.download.source_path.as_deref(), Some("/exports"));
        assert_eq!(config.download.hwm, Some(HwmKind::FileModifiedTime));
        assert_eq!(config.download.options.mode, FileWriteMode::DeleteAll);
        assert!(config.download.options.delete_source);
        assert_eq!(config.download.filters.len(), 2);
        assert_eq!(
            config.download.limits,
            vec![LimitConfig::MaxFilesCount { count_limit: 5 }]
        );
        assert_eq!(config.upload.target_path.as_deref(), Some("/imports"));
        assert_eq!(config.upload.options, TransferOptions::default());
    }

    #[test]
    fn test_empty_job_file_uses_defaults() {
        let config = JobConfig::parse("").expect("Failed to parse config");
        assert!(config.remote_root.is_none());
        assert!(config.download.hwm.is_none());
        assert_eq!(config.download.options.mode, FileWriteMode::Error);
    }

    #[test]
    fn test_rejects_unknown_values() {
        assert!(JobConfig::parse("[download]\nhwm = \"column\"").is_err());
        assert!(JobConfig::parse("[download]\noptions = { mode = \"append\" }").is_err());
        assert!(JobConfig::parse("remote = \"/x\"").is_err());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let err = JobConfig::load(&dir.path().join("job.toml")).expect_err("Load should fail");
        assert!(err.to_string().contains("Failed to read job file"));
    }
}
