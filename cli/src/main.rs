//! hwm-transfer - Command-line interface for the transfer engine.
//!
//! Downloads from and uploads to a directory served as a file connection
//! (typically a mounted share). Settings come from flags, a TOML job file,
//! or both. Progress goes to stderr, logs are controlled with `RUST_LOG`.
//!
//! Exit codes: 0 when every file was handled, 1 when some files failed or
//! went missing, 2 when the run could not start.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::JobConfig;
use transfer_engine::connection::{FileConnection, LocalFsConnection};
use transfer_engine::progress::{FileOutcome, ProgressCallback, TransferSummary};
use transfer_engine::result::format_size;
use transfer_engine::strategy::{self, Strategy};
use transfer_engine::{
    ExcludeDirsFilter, FileDownloader, FileDownloaderBuilder, FileFilter, FileUploader,
    FileWriteMode, GlobFilter, HwmKind, HwmStore, JsonFileHwmStore, LocalPath, MaxFilesCount,
    MemoryHwmStore, RegexFilter, RemotePath, TransferResult,
};

/// hwm-transfer - Incremental file transfers
#[derive(Parser, Debug)]
#[command(name = "hwm-transfer")]
#[command(version)]
#[command(about = "Download and upload files, remembering what was already transferred")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML job file, flags override its values
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output (per-file progress, debug logs)
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download files from the remote root to a local directory
    Download(DownloadArgs),
    /// Upload files from a local directory to the remote root
    Upload(UploadArgs),
    /// List the files a download would pick up, without transferring them
    View(SourceArgs),
}

/// Where and what to read on the remote side.
#[derive(clap::Args, Debug, Default)]
struct SourceArgs {
    /// Local directory served as the remote `/`
    #[arg(long, value_name = "PATH")]
    remote_root: Option<PathBuf>,

    /// Remote directory to download from
    #[arg(long, value_name = "PATH")]
    source_path: Option<String>,

    /// Only files whose name matches this glob
    #[arg(long, value_name = "PATTERN")]
    glob: Option<String>,

    /// Only files whose path matches this regular expression
    #[arg(long, value_name = "REGEX")]
    regex: Option<String>,

    /// Skip this remote directory (repeatable)
    #[arg(long = "exclude-dir", value_name = "PATH")]
    exclude_dirs: Vec<String>,

    /// Stop after this many files
    #[arg(long, value_name = "COUNT", conflicts_with = "no_limit")]
    max_files: Option<usize>,

    /// Walk the whole source tree
    #[arg(long)]
    no_limit: bool,

    /// Watermark kind: file_list or file_modified_time
    #[arg(long, value_name = "KIND")]
    hwm: Option<String>,

    /// Directory of the JSON watermark store
    #[arg(long, value_name = "PATH")]
    hwm_store: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Default)]
struct DownloadArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Local destination directory
    #[arg(long, value_name = "PATH")]
    local_path: Option<PathBuf>,

    /// Local staging directory
    #[arg(long, value_name = "PATH")]
    temp_path: Option<PathBuf>,

    /// Write mode: error, ignore, overwrite or delete_all
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Remove remote files once downloaded
    #[arg(long)]
    delete_source: bool,

    /// Download exactly these remote files instead of walking the source
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

#[derive(clap::Args, Debug, Default)]
struct UploadArgs {
    /// Local directory served as the remote `/`
    #[arg(long, value_name = "PATH")]
    remote_root: Option<PathBuf>,

    /// Local directory to upload from
    #[arg(long, value_name = "PATH")]
    local_path: Option<PathBuf>,

    /// Remote target directory
    #[arg(long, value_name = "PATH")]
    target_path: Option<String>,

    /// Remote staging directory
    #[arg(long, value_name = "PATH")]
    temp_path: Option<String>,

    /// Write mode: error, ignore, overwrite or delete_all
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Remove local files once uploaded
    #[arg(long)]
    delete_source: bool,

    /// Upload exactly these local files
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

/// CLI implementation of ProgressCallback for displaying transfer progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, total: usize) {
        eprintln!("Transferring {} files...", total);
    }

    fn on_file_started(
        &self,
        index: usize,
        total: usize,
        source: &dyn std::fmt::Display,
        target: &dyn std::fmt::Display,
    ) {
        if self.verbose {
            eprintln!("[{:3}/{}] {} -> {}", index + 1, total, source, target);
        }
    }

    fn on_file_completed(&self, index: usize, source: &dyn std::fmt::Display, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Failed(e) => eprintln!("[{:3}] Failed: {}: {}", index + 1, source, e),
            _ if self.verbose => eprintln!("[{:3}] {}: {}", index + 1, outcome, source),
            _ => {}
        }
    }

    fn on_run_completed(&self, summary: &TransferSummary) {
        eprintln!();
        eprintln!("Transfer complete!");
        eprintln!(
            "Summary: {} successful, {} failed, {} skipped, {} missing",
            summary.successful, summary.failed, summary.skipped, summary.missing
        );
        eprintln!("Bytes transferred: {}", format_size(summary.bytes));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability. Returns the exit code.
fn run_cli(args: &Args) -> Result<i32> {
    let config = match &args.config {
        Some(path) => JobConfig::load(path)?,
        None => JobConfig::default(),
    };

    match &args.command {
        Command::Download(download) => run_download(download, &config, args.verbose),
        Command::Upload(upload) => run_upload(upload, &config, args.verbose),
        Command::View(source) => run_view(source, &config),
    }
}

fn run_download(args: &DownloadArgs, config: &JobConfig, verbose: bool) -> Result<i32> {
    let local_path = args
        .local_path
        .clone()
        .or_else(|| config.download.local_path.clone())
        .context("No local path given, use --local-path or set download.local_path")?;

    let mut options = config.download.options;
    if let Some(mode) = &args.mode {
        options.mode = parse_mode(mode)?;
    }
    options.delete_source |= args.delete_source;

    let mut builder = source_builder(&args.source, config, local_path)?
        .options(options)
        .progress(Box::new(CliProgress::new(verbose)));
    if let Some(temp) = args.temp_path.clone().or_else(|| config.download.temp_path.clone()) {
        builder = builder.temp_path(temp);
    }
    let incremental = hwm_kind(&args.source, config)?.is_some();
    let mut downloader = builder.build()?;

    let files = if args.files.is_empty() {
        None
    } else {
        Some(args.files.iter().map(RemotePath::new).collect())
    };

    // Watermarks are only honored inside an incremental strategy
    let _guard = incremental.then(|| strategy::enter(Strategy::incremental()));
    let result = downloader.run(files)?;
    Ok(report(&result))
}

fn run_upload(args: &UploadArgs, config: &JobConfig, verbose: bool) -> Result<i32> {
    let connection = open_connection(args.remote_root.as_ref(), config)?;
    let target_path = args
        .target_path
        .clone()
        .or_else(|| config.upload.target_path.clone())
        .context("No target path given, use --target-path or set upload.target_path")?;

    let mut options = config.upload.options;
    if let Some(mode) = &args.mode {
        options.mode = parse_mode(mode)?;
    }
    options.delete_source |= args.delete_source;

    let mut builder = FileUploader::builder(connection, target_path)
        .options(options)
        .progress(Box::new(CliProgress::new(verbose)));
    if let Some(local) = args.local_path.clone().or_else(|| config.upload.local_path.clone()) {
        builder = builder.local_path(local);
    }
    if let Some(temp) = args.temp_path.clone().or_else(|| config.upload.temp_path.clone()) {
        builder = builder.temp_path(temp);
    }
    let mut uploader = builder.build()?;

    let files = if args.files.is_empty() {
        None
    } else {
        Some(args.files.iter().map(|f| LocalPath::new(f.clone())).collect())
    };

    let result = uploader.run(files)?;
    Ok(report(&result))
}

fn run_view(args: &SourceArgs, config: &JobConfig) -> Result<i32> {
    // Nothing is written locally when only listing
    let mut downloader = source_builder(args, config, PathBuf::from("."))?.build()?;
    let files = downloader.view_files()?;

    for file in &files {
        println!("{}\t{}", file.path, format_size(file.stat.size));
    }
    eprintln!("{} files, {}", files.len(), format_size(files.total_size()));
    Ok(0)
}

/// Downloader builder with the remote side configured: connection, source,
/// filters, limits and watermark.
fn source_builder(
    args: &SourceArgs,
    config: &JobConfig,
    local_path: PathBuf,
) -> Result<FileDownloaderBuilder> {
    let connection = open_connection(args.remote_root.as_ref(), config)?;
    let mut builder = FileDownloader::builder(connection, local_path);

    if let Some(source) = args.source_path.clone().or_else(|| config.download.source_path.clone()) {
        builder = builder.source_path(source);
    }

    builder = builder.filters(build_filters(args, config)?);

    if args.no_limit {
        builder = builder.no_limit();
    } else if let Some(count) = args.max_files {
        builder = builder.limit(Box::new(MaxFilesCount::new(count)));
    } else {
        builder = builder.limits(config.download.limits.iter().map(|l| l.build()).collect());
    }

    if let Some(kind) = hwm_kind(args, config)? {
        let store: Arc<dyn HwmStore> =
            match args.hwm_store.as_ref().or(config.hwm_store.as_ref()) {
                Some(dir) => Arc::new(JsonFileHwmStore::new(dir.clone())?),
                None => {
                    warn!("No watermark store given, watermarks will not outlive this run");
                    Arc::new(MemoryHwmStore::new())
                }
            };
        builder = builder.hwm_kind(kind).hwm_store(store);
    }
    Ok(builder)
}

/// Filters from flags if any is given, from the job file otherwise.
fn build_filters(args: &SourceArgs, config: &JobConfig) -> Result<Vec<Box<dyn FileFilter>>> {
    let mut filters: Vec<Box<dyn FileFilter>> = Vec::new();
    if let Some(pattern) = &args.glob {
        filters.push(Box::new(GlobFilter::new(pattern)?));
    }
    if let Some(pattern) = &args.regex {
        filters.push(Box::new(RegexFilter::new(pattern)?));
    }
    if !args.exclude_dirs.is_empty() {
        filters.push(Box::new(ExcludeDirsFilter::new(args.exclude_dirs.iter().map(RemotePath::new))));
    }

    if filters.is_empty() {
        for filter in &config.download.filters {
            filters.push(filter.build()?);
        }
    }
    Ok(filters)
}

fn hwm_kind(args: &SourceArgs, config: &JobConfig) -> Result<Option<HwmKind>> {
    match &args.hwm {
        Some(kind) => Ok(Some(kind.parse()?)),
        None => Ok(config.download.hwm),
    }
}

fn parse_mode(mode: &str) -> Result<FileWriteMode> {
    Ok(mode.parse()?)
}

fn open_connection(flag: Option<&PathBuf>, config: &JobConfig) -> Result<Arc<dyn FileConnection>> {
    let root = match flag.or(config.remote_root.as_ref()) {
        Some(root) => root,
        None => bail!("No remote root given, use --remote-root or set remote_root"),
    };
    let connection = LocalFsConnection::new(root)
        .with_context(|| format!("Cannot open remote root {}", root.display()))?;
    Ok(Arc::new(connection))
}

/// Print failed and missing files, return the exit code for the result.
fn report<S, D>(result: &TransferResult<S, D>) -> i32
where
    S: transfer_engine::path::PathLike,
    D: transfer_engine::path::PathLike,
{
    if !result.failed.is_empty() {
        eprintln!();
        eprintln!("Failed files:");
        for failed in &result.failed {
            eprintln!("  {}: {}", failed.path(), failed.error);
        }
    }
    if !result.missing.is_empty() {
        eprintln!();
        eprintln!("Missing files:");
        for missing in &result.missing {
            eprintln!("  {}", missing);
        }
    }

    if result.is_clean() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["hwm-transfer"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).expect("Failed to parse arguments")
    }

    fn path_arg(path: &std::path::Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_cli_download_tree() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(remote.path().join("exports/sub")).expect("Failed to create dirs");
        fs::write(remote.path().join("exports/a.txt"), "a").expect("Failed to write file");
        fs::write(remote.path().join("exports/sub/b.txt"), "b").expect("Failed to write file");

        let args = parse(&[
            "download",
            "--remote-root",
            &path_arg(remote.path()),
            "--source-path",
            "/exports",
            "--local-path",
            &path_arg(local.path()),
        ]);

        let code = run_cli(&args).expect("CLI run failed");
        assert_eq!(code, 0);
        assert!(local.path().join("sub/b.txt").exists());
    }

    #[test]
    fn test_cli_missing_file_exits_with_one() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        fs::write(remote.path().join("a.txt"), "a").expect("Failed to write file");

        let args = parse(&[
            "download",
            "--remote-root",
            &path_arg(remote.path()),
            "--local-path",
            &path_arg(local.path()),
            "/a.txt",
            "/gone.txt",
        ]);

        let code = run_cli(&args).expect("CLI run failed");
        assert_eq!(code, 1);
        assert!(local.path().join("a.txt").exists());
    }

    #[test]
    fn test_cli_rejects_invalid_mode() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");

        let args = parse(&[
            "download",
            "--remote-root",
            &path_arg(remote.path()),
            "--source-path",
            "/",
            "--local-path",
            &path_arg(local.path()),
            "--mode",
            "append",
        ]);
        assert!(run_cli(&args).is_err(), "CLI should reject invalid mode");
    }

    #[test]
    fn test_cli_requires_remote_root() {
        let local = TempDir::new().expect("Failed to create temp dir");
        let args = parse(&["download", "--local-path", &path_arg(local.path())]);
        assert!(run_cli(&args).is_err(), "CLI should require a remote root");
    }

    #[test]
    fn test_cli_incremental_download_with_job_file() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        let state = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(remote.path().join("exports")).expect("Failed to create dirs");
        fs::write(remote.path().join("exports/a.csv"), "a").expect("Failed to write file");
        fs::write(remote.path().join("exports/skip.txt"), "s").expect("Failed to write file");

        let job = state.path().join("job.toml");
        fs::write(
            &job,
            format!(
                r#"
                remote_root = '{}'
                hwm_store = '{}'

                [download]
                source_path = "/exports"
                local_path = '{}'
                hwm = "file_list"

                [[download.filters]]
                type = "glob"
                pattern = "*.csv"
                "#,
                path_arg(remote.path()),
                path_arg(&state.path().join("hwm")),
                path_arg(local.path()),
            ),
        )
        .expect("Failed to write job file");

        let args = parse(&["--config", &path_arg(&job), "download"]);
        assert_eq!(run_cli(&args).expect("First run failed"), 0);
        assert!(local.path().join("a.csv").exists());
        assert!(!local.path().join("skip.txt").exists());

        // The watermark covers a.csv, so removing it locally does not bring it back
        fs::remove_file(local.path().join("a.csv")).expect("Failed to remove file");
        assert_eq!(run_cli(&args).expect("Second run failed"), 0);
        assert!(!local.path().join("a.csv").exists());

        // Flags win over the job file
        let args = parse(&["--config", &path_arg(&job), "download", "--glob", "*.txt"]);
        assert_eq!(run_cli(&args).expect("Third run failed"), 0);
        assert!(local.path().join("skip.txt").exists());
    }

    #[test]
    fn test_cli_upload() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        let local = TempDir::new().expect("Failed to create temp dir");
        fs::write(local.path().join("report.csv"), "r").expect("Failed to write file");

        let args = parse(&[
            "upload",
            "--remote-root",
            &path_arg(remote.path()),
            "--local-path",
            &path_arg(local.path()),
            "--target-path",
            "/imports",
            "--temp-path",
            "/staging",
        ]);

        let code = run_cli(&args).expect("CLI run failed");
        assert_eq!(code, 0);
        assert!(remote.path().join("imports/report.csv").exists());
    }

    #[test]
    fn test_cli_view() {
        let remote = TempDir::new().expect("Failed to create temp dir");
        fs::write(remote.path().join("a.txt"), "a").expect("Failed to write file");

        let args = parse(&[
            "view",
            "--remote-root",
            &path_arg(remote.path()),
            "--source-path",
            "/",
            "--max-files",
            "1",
        ]);
        assert_eq!(run_cli(&args).expect("CLI run failed"), 0);
    }

    #[test]
    fn test_cli_conflicting_limit_flags() {
        let result = Args::try_parse_from([
            "hwm-transfer",
            "view",
            "--max-files",
            "1",
            "--no-limit",
        ]);
        assert!(result.is_err());
    }
}
