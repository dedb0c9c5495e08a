use std::collections::HashSet;

use crate::config::{AdapterTransport, Config};
use crate::error::ConfigError;

/// Validate a [`Config`], returning all detected violations.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |field: String, message: String| {
        errors.push(ConfigError::Validation { field, message });
    };

    for (name, adapter) in &config.adapters {
        if adapter.command.trim().is_empty() {
            invalid(format!("adapters.{name}.command"), "must not be empty".into());
        }
        if adapter.transport == AdapterTransport::Tcp && adapter.port.is_none() {
            invalid(
                format!("adapters.{name}.port"),
                "required when transport is \"tcp\"".into(),
            );
        }
    }

    for (name, task) in &config.tasks {
        if task.command.trim().is_empty() {
            invalid(format!("tasks.{name}.command"), "must not be empty".into());
        }
    }

    let mut seen = HashSet::new();
    for configuration in &config.configurations {
        let name = &configuration.name;
        if name.is_empty() {
            invalid("configurations.name".into(), "must not be empty".into());
        } else if !seen.insert(name.as_str()) {
            invalid(format!("configurations.{name}"), "duplicate configuration name".into());
        }

        if !matches!(configuration.request.as_str(), "launch" | "attach") {
            invalid(
                format!("configurations.{name}.request"),
                format!("must be \"launch\" or \"attach\", got \"{}\"", configuration.request),
            );
        }

        if !config.adapters.contains_key(&configuration.adapter_type) {
            invalid(
                format!("configurations.{name}.type"),
                format!("unknown adapter `{}`", configuration.adapter_type),
            );
        }

        let tasks = [
            ("pre_debug_task", &configuration.pre_debug_task),
            ("post_debug_task", &configuration.post_debug_task),
        ];
        for (field, task) in tasks {
            if let Some(task) = task {
                if !config.tasks.contains_key(task) {
                    invalid(
                        format!("configurations.{name}.{field}"),
                        format!("unknown task `{task}`"),
                    );
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        toml::from_str(text).expect("parse")
    }

    const VALID: &str = r#"
[adapters.lldb]
command = "lldb-dap"

[tasks.build]
command = "make"

[[configurations]]
name = "Run"
type = "lldb"
pre_debug_task = "build"
"#;

    #[test]
    fn valid_default_config_passes() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn valid_sample_passes() {
        assert!(validate(&parse(VALID)).is_ok());
    }

    #[test]
    fn empty_adapter_command_rejected() {
        let mut cfg = parse(VALID);
        cfg.adapters.get_mut("lldb").unwrap().command = " ".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("adapters.lldb.command"));
    }

    #[test]
    fn tcp_adapter_needs_port() {
        let mut cfg = parse(VALID);
        cfg.adapters.get_mut("lldb").unwrap().transport = AdapterTransport::Tcp;
        let errs = validate(&cfg).unwrap_err();
        assert!(errs[0].to_string().contains("adapters.lldb.port"));
    }

    #[test]
    fn bad_request_kind_rejected() {
        let mut cfg = parse(VALID);
        cfg.configurations[0].request = "debug".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("configurations.Run.request"));
    }

    #[test]
    fn unknown_adapter_and_task_rejected() {
        let mut cfg = parse(VALID);
        cfg.configurations[0].adapter_type = "gdb".into();
        cfg.configurations[0].post_debug_task = Some("deploy".into());
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs[0].to_string().contains("unknown adapter `gdb`"));
        assert!(errs[1].to_string().contains("unknown task `deploy`"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut cfg = parse(VALID);
        let copy = cfg.configurations[0].clone();
        cfg.configurations.push(copy);
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("duplicate configuration name"));
    }
}
