//! Log file helpers: rotation and directory setup.
//!
//! The `tracing-subscriber` setup itself lives in the binary, which is the
//! only crate depending on it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the current file reaches 10 MB.
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated files kept beside the current one.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// File name of the log inside the log directory.
pub const LOG_FILE_NAME: &str = "dapctl.log";

/// Ensure the parent directory of a log file exists.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Rotate `dapctl.log -> dapctl.log.1 -> ... -> dapctl.log.<max_files>`,
/// dropping the oldest, once the current file is at least `max_size` bytes.
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let size = match fs::metadata(log_path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_size {
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
    fs::rename(log_path, rotated_path(log_path, 1))?;
    tracing::debug!("rotated {}", log_path.display());
    Ok(())
}

/// Prepare `log_path` for appending: create its directory and rotate.
pub fn prepare_log_file(log_path: &Path) -> io::Result<()> {
    ensure_log_dir(log_path)?;
    rotate_log_files(log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}.{}", name, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotated_path_format_is_correct() {
        let base = Path::new("/tmp/dapctl.log");
        assert_eq!(rotated_path(base, 1), PathBuf::from("/tmp/dapctl.log.1"));
        assert_eq!(rotated_path(base, 3), PathBuf::from("/tmp/dapctl.log.3"));
    }

    #[test]
    fn rotate_no_op_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        assert!(rotate_log_files(&log, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).is_ok());
    }

    #[test]
    fn rotate_no_op_when_file_under_max_size() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(&log, "small").unwrap();
        rotate_log_files(&log, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn rotate_cascades_and_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(dir.path().join("dapctl.log.1"), "old1").unwrap();
        fs::write(dir.path().join("dapctl.log.2"), "old2").unwrap();
        fs::write(&log, "x".repeat(200)).unwrap();

        rotate_log_files(&log, 50, 2).unwrap();

        assert!(!log.exists());
        assert_eq!(fs::read_to_string(dir.path().join("dapctl.log.1")).unwrap(), "x".repeat(200));
        assert_eq!(fs::read_to_string(dir.path().join("dapctl.log.2")).unwrap(), "old1");
        assert!(!dir.path().join("dapctl.log.3").exists());
    }

    #[test]
    fn prepare_creates_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("a").join("b").join(LOG_FILE_NAME);
        prepare_log_file(&log).unwrap();
        prepare_log_file(&log).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
    }
}
