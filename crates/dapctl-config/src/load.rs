use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# dapctl configuration
# Uncomment and edit settings below.

# [log]
# level = "info"
# file = "/tmp/dapctl.log"

# [breakpoints]
# file = "/home/me/.local/share/dapctl/breakpoints.json"

# [adapters.lldb]
# command = "lldb-dap"
# args = []
# transport = "stdio"

# [adapters.debugpy]
# command = "python3"
# args = ["-m", "debugpy.adapter", "--host", "127.0.0.1", "--port", "5678"]
# transport = "tcp"
# port = 5678

# [tasks.build]
# command = "cargo"
# args = ["build"]

# [[configurations]]
# name = "Run"
# type = "lldb"
# request = "launch"
# pre_debug_task = "build"
# program = "${workspace}/target/debug/app"
"#;

/// Load the effective configuration.
///
/// The global `config_dir/config.toml` is created with commented-out
/// defaults when missing. A project `.dapctl/config.toml`, searched from
/// `project_dir` upward, is layered over it. The merged result must pass
/// validation.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or the first
/// validation failure.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let layers = std::iter::once(ensure_global_config(config_dir)?)
        .chain(project_dir.and_then(find_project_config));

    let mut config = Config::default();
    for path in layers {
        let content = std::fs::read_to_string(&path)?;
        if !has_settings(&content) {
            continue;
        }
        tracing::debug!("merging config layer {}", path.display());
        config = merge_configs(&config, &path.display().to_string(), &content)?;
    }

    check(config)
}

/// Parse a TOML string directly into a validated [`Config`].
///
/// # Errors
///
/// Returns [`ConfigError`] on parse or validation failure.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config = toml::from_str(toml_str).map_err(|e| ConfigError::parse("<string>", e))?;
    check(config)
}

fn check(config: Config) -> Result<Config, ConfigError> {
    match validate(&config) {
        Ok(()) => Ok(config),
        Err(errors) => {
            for error in errors.iter().skip(1) {
                tracing::warn!("{}", error);
            }
            Err(errors.into_iter().next().unwrap_or_else(|| ConfigError::Validation {
                field: "config".to_string(),
                message: "validation failed".to_string(),
            }))
        }
    }
}

/// Path of the global config file, writing the commented template first
/// when there is none.
fn ensure_global_config(config_dir: &Path) -> Result<PathBuf, ConfigError> {
    let path = config_dir.join("config.toml");
    if path.exists() {
        return Ok(path);
    }
    std::fs::create_dir_all(config_dir)
        .and_then(|()| std::fs::write(&path, DEFAULT_CONFIG_CONTENT))
        .map_err(|source| ConfigError::CreateDefault {
            path: path.clone(),
            source,
        })?;
    tracing::info!("wrote default config to {}", path.display());
    Ok(path)
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".dapctl").join("config.toml"))
        .find(|candidate| candidate.is_file())
}

/// Whether `content` holds anything besides blank lines and comments.
fn has_settings(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::TempDir;

    const GLOBAL: &str = r#"
[log]
level = "warn"

[adapters.lldb]
command = "lldb-dap"

[[configurations]]
name = "Run"
type = "lldb"
program = "a.out"
"#;

    #[test]
    fn load_config_creates_default_when_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config, Config::default());
        assert!(cfg_dir.join("config.toml").exists());
    }

    #[test]
    fn load_config_reads_existing_global() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), GLOBAL).unwrap();

        let config = load_config(tmp.path(), None).unwrap();
        assert_eq!(config.log.level, LogLevel::Warn);
        assert_eq!(config.configurations.len(), 1);
    }

    #[test]
    fn load_config_merges_project_over_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), GLOBAL).unwrap();

        let proj_dir = tmp.path().join("project");
        let dot_dir = proj_dir.join(".dapctl");
        std::fs::create_dir_all(&dot_dir).unwrap();
        std::fs::write(dot_dir.join("config.toml"), "[log]\nlevel = \"debug\"\n").unwrap();

        let nested = proj_dir.join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_config(&cfg_dir, Some(&nested)).unwrap();
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.adapters["lldb"].command, "lldb-dap");
    }

    #[test]
    fn load_config_reports_validation_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[[configurations]]\nname = \"Run\"\ntype = \"gdb\"\n",
        )
        .unwrap();
        let err = load_config(tmp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "configurations.Run.type"));
    }

    #[test]
    fn load_from_str_parses_valid_toml() {
        let config = load_from_str(GLOBAL).unwrap();
        assert_eq!(config.configurations[0].name, "Run");
    }

    #[test]
    fn load_from_str_rejects_invalid_toml() {
        assert!(matches!(load_from_str("{{bad}}"), Err(ConfigError::Parse { ref origin, .. }) if origin == "<string>"));
    }

    #[test]
    fn default_config_has_no_settings() {
        assert!(!has_settings(DEFAULT_CONFIG_CONTENT));
    }

    #[test]
    fn find_project_config_walks_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(root.join(".dapctl")).unwrap();
        std::fs::write(root.join(".dapctl").join("config.toml"), "").unwrap();

        let deep = root.join("src").join("module");
        std::fs::create_dir_all(&deep).unwrap();

        let found = find_project_config(&deep).unwrap();
        assert!(found.ends_with(".dapctl/config.toml"));
    }
}
