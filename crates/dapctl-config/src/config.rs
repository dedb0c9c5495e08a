use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Log file; defaults to `<data_dir>/logs/dapctl.log`.
    pub file: Option<PathBuf>,
}

/// Where breakpoints are saved between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakpointsConfig {
    /// JSON file; defaults to `<data_dir>/breakpoints.json`.
    pub file: Option<PathBuf>,
}

/// How to talk to a spawned adapter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterTransport {
    /// DAP over the child's stdin/stdout.
    #[default]
    Stdio,
    /// The child listens on `127.0.0.1:<port>`.
    Tcp,
}

/// A debug adapter definition, keyed by adapter type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub transport: AdapterTransport,
    /// Required for `tcp`.
    pub port: Option<u16>,
    /// Reported as the installed version; defaults to `unknown`.
    pub version: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A named command usable as a pre or post debug task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One `[[configurations]]` entry.
///
/// Keys other than the ones named here are passed to the adapter
/// unchanged as launch/attach arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    pub name: String,
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default = "default_request")]
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_debug_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_debug_task: Option<String>,
    #[serde(flatten)]
    pub arguments: toml::Table,
}

fn default_request() -> String {
    "launch".to_string()
}

/// Top-level dapctl configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub breakpoints: BreakpointsConfig,
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterEntry>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskEntry>,
    #[serde(default)]
    pub configurations: Vec<LaunchConfiguration>,
}

impl Config {
    /// Look up a configuration by name, returning its position too.
    pub fn configuration(&self, name: &str) -> Option<(usize, &LaunchConfiguration)> {
        self.configurations
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    /// Like [`Config::configuration`], failing with
    /// [`ConfigError::NotFound`].
    pub fn require_configuration(&self, name: &str) -> Result<(usize, &LaunchConfiguration), ConfigError> {
        self.configuration(name).ok_or_else(|| ConfigError::NotFound {
            kind: "configuration",
            name: name.to_string(),
        })
    }

    pub fn adapter(&self, adapter_type: &str) -> Result<&AdapterEntry, ConfigError> {
        self.adapters.get(adapter_type).ok_or_else(|| ConfigError::NotFound {
            kind: "adapter",
            name: adapter_type.to_string(),
        })
    }

    pub fn task(&self, name: &str) -> Result<&TaskEntry, ConfigError> {
        self.tasks.get(name).ok_or_else(|| ConfigError::NotFound {
            kind: "task",
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[log]
level = "debug"

[breakpoints]
file = "/tmp/breakpoints.json"

[adapters.lldb]
command = "lldb-dap"

[adapters.debugpy]
command = "python3"
args = ["-m", "debugpy.adapter", "--port", "5678"]
transport = "tcp"
port = 5678

[tasks.build]
command = "cargo"
args = ["build"]

[[configurations]]
name = "Run app"
type = "lldb"
pre_debug_task = "build"
program = "target/debug/app"
args = ["--verbose"]
stopOnEntry = true

[[configurations]]
name = "Attach"
type = "debugpy"
request = "attach"
"#;

    #[test]
    fn default_config_is_empty() {
        let cfg = Config::default();
        assert_eq!(cfg.log.level, LogLevel::Info);
        assert!(cfg.log.file.is_none());
        assert!(cfg.breakpoints.file.is_none());
        assert!(cfg.adapters.is_empty());
        assert!(cfg.configurations.is_empty());
    }

    #[test]
    fn parse_full_sample() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse toml");
        assert_eq!(cfg.log.level, LogLevel::Debug);
        assert_eq!(cfg.breakpoints.file, Some(PathBuf::from("/tmp/breakpoints.json")));

        let lldb = &cfg.adapters["lldb"];
        assert_eq!(lldb.transport, AdapterTransport::Stdio);
        assert!(lldb.args.is_empty());
        let debugpy = &cfg.adapters["debugpy"];
        assert_eq!(debugpy.transport, AdapterTransport::Tcp);
        assert_eq!(debugpy.port, Some(5678));

        let (index, run) = cfg.configuration("Run app").unwrap();
        assert_eq!(index, 0);
        assert_eq!(run.adapter_type, "lldb");
        assert_eq!(run.request, "launch");
        assert_eq!(run.pre_debug_task.as_deref(), Some("build"));
        assert_eq!(run.arguments["program"].as_str(), Some("target/debug/app"));
        assert_eq!(run.arguments["stopOnEntry"].as_bool(), Some(true));
        assert!(!run.arguments.contains_key("name"));
        assert_eq!(cfg.require_configuration("Attach").unwrap().0, 1);
        assert_eq!(cfg.task("build").unwrap().command, "cargo");
        assert!(!run.arguments.contains_key("type"));

        let (_, attach) = cfg.configuration("Attach").unwrap();
        assert_eq!(attach.request, "attach");
        assert!(attach.arguments.is_empty());
    }

    #[test]
    fn serde_roundtrip_keeps_free_form_arguments() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse toml");
        let text = toml::to_string(&cfg).expect("serialize");
        let back: Config = toml::from_str(&text).expect("deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").expect("parse empty toml");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn log_level_names() {
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::default().as_str(), "info");
    }

    #[test]
    fn missing_names_are_not_found() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse toml");
        assert!(matches!(
            cfg.require_configuration("Test"),
            Err(ConfigError::NotFound { kind: "configuration", .. })
        ));
        assert!(matches!(cfg.adapter("gdb"), Err(ConfigError::NotFound { kind: "adapter", .. })));
        assert!(matches!(cfg.task("lint"), Err(ConfigError::NotFound { kind: "task", .. })));
    }
}
