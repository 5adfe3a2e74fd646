//! Logging helpers for hosts embedding the debug server.
//!
//! Provides log-file rotation, default path resolution, level conversion,
//! and [`init`], which installs a `tracing-subscriber` fmt subscriber.
//! Log output never goes to stdout: in stdio mode stdout carries protocol
//! frames.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use moonlit_config::{LogConfig, LogLevel};
use tracing_subscriber::EnvFilter;

use crate::error::DapError;

/// Size at which the log file is rotated on startup (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files kept.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// Return the platform-specific default log file path.
///
/// * macOS: `$HOME/Library/Logs/moonlit/moonlit.log`
/// * Linux: `$HOME/.local/share/moonlit/moonlit.log`
/// * Windows: `%APPDATA%/moonlit/logs/moonlit.log`
/// * Fallback: `<temp dir>/moonlit/moonlit.log`
pub fn default_log_file_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Logs/moonlit/moonlit.log");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".local/share/moonlit/moonlit.log");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("moonlit\\logs\\moonlit.log");
        }
    }
    std::env::temp_dir().join("moonlit").join("moonlit.log")
}

/// Create the parent directory of `log_path` if it is missing.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Rotate `log_path` once it reaches `max_size` bytes.
///
/// `moonlit.log` becomes `moonlit.log.1`, each `.N` becomes `.N+1`, and
/// `.max_files` is deleted. A missing or small file is left alone.
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let len = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if len < max_size || max_files == 0 {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

/// Filter directive for `level`, scoped to the moonlit crates so host
/// crates keep their own verbosity.
pub fn log_level_to_filter(level: &LogLevel) -> String {
    let level = level.as_str();
    format!("warn,moonlit_dap={level},moonlit_config={level}")
}

/// Install the global subscriber described by `config`.
///
/// Writes to `config.file` (rotated first) or to stderr. `RUST_LOG`
/// overrides the configured level. Returns `Ok(false)` when a global
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<bool, DapError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_to_filter(&config.level)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true);

    let installed = match &config.file {
        Some(path) => {
            ensure_log_dir(path)?;
            rotate_log_files(path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)?;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Mutex::new(file)).try_init().is_ok()
        }
        None => builder.with_writer(io::stderr).try_init().is_ok(),
    };
    if installed {
        tracing::info!(level = config.level.as_str(), file = ?config.file, "logging initialized");
    }
    Ok(installed)
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_default_path_is_moonlit_log() {
        let path = default_log_file_path();
        assert!(path.to_string_lossy().contains("moonlit"), "got {path:?}");
        assert!(path.extension().is_some_and(|e| e == "log"));
    }

    #[test]
    fn logging_rotated_path_format() {
        let base = Path::new("/var/log/moonlit.log");
        assert_eq!(rotated_path(base, 2), PathBuf::from("/var/log/moonlit.log.2"));
    }

    #[test]
    fn logging_rotate_ignores_missing_and_small_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("moonlit.log");
        rotate_log_files(&log, 10, 3).unwrap();

        fs::write(&log, "tiny").unwrap();
        rotate_log_files(&log, 10, 3).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn logging_rotate_cascades_and_drops_oldest() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("moonlit.log");
        fs::write(dir.path().join("moonlit.log.1"), "old1").unwrap();
        fs::write(dir.path().join("moonlit.log.2"), "old2").unwrap();
        fs::write(&log, "x".repeat(64)).unwrap();

        rotate_log_files(&log, 32, 2).unwrap();

        assert!(!log.exists());
        let read = |n: &str| fs::read_to_string(dir.path().join(n)).unwrap();
        assert_eq!(read("moonlit.log.1"), "x".repeat(64));
        assert_eq!(read("moonlit.log.2"), "old1");
    }

    #[test]
    fn logging_ensure_dir_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("a").join("b").join("moonlit.log");
        ensure_log_dir(&log).unwrap();
        ensure_log_dir(&log).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
        ensure_log_dir(Path::new("moonlit.log")).unwrap();
    }

    #[test]
    fn logging_filter_scopes_moonlit_crates() {
        assert_eq!(
            log_level_to_filter(&LogLevel::Debug),
            "warn,moonlit_dap=debug,moonlit_config=debug"
        );
        assert!(log_level_to_filter(&LogLevel::Error).ends_with("moonlit_config=error"));
    }

    #[test]
    fn logging_init_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LogConfig {
            level: LogLevel::Debug,
            file: Some(dir.path().join("logs").join("moonlit.log")),
        };
        let first = init(&config).unwrap();
        let second = init(&config).unwrap();
        assert!(!second);
        if first {
            assert!(dir.path().join("logs").join("moonlit.log").exists());
        }
    }
}
