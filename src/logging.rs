use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use dapctl_config::LogConfig;
use dapctl_core::logging::{prepare_log_file, LOG_FILE_NAME};
use dapctl_core::Paths;

/// Where tracing output goes for `config`.
pub(crate) fn log_path(config: &LogConfig, paths: &dyn Paths) -> PathBuf {
    config
        .file
        .clone()
        .unwrap_or_else(|| paths.log_dir().join(LOG_FILE_NAME))
}

/// Install the global subscriber. Output goes to a rotated file so it never
/// mixes with debuggee output on the terminal. `RUST_LOG` overrides the
/// configured level.
pub(crate) fn init(config: &LogConfig, paths: &dyn Paths) -> Result<()> {
    let path = log_path(config, paths);
    prepare_log_file(&path).with_context(|| format!("failed to prepare log file {}", path.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dapctl_core::DefaultPaths;

    #[test]
    fn log_path_defaults_to_log_dir() {
        let paths = DefaultPaths::with_home("/home/me");
        let path = log_path(&LogConfig::default(), &paths);
        assert_eq!(path, PathBuf::from("/home/me/.local/share/dapctl/logs/dapctl.log"));
    }

    #[test]
    fn log_path_prefers_configured_file() {
        let paths = DefaultPaths::with_home("/home/me");
        let config = LogConfig {
            file: Some(PathBuf::from("/tmp/debug.log")),
            ..LogConfig::default()
        };
        assert_eq!(log_path(&config, &paths), PathBuf::from("/tmp/debug.log"));
    }
}
