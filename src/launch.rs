//! Turns `[[configurations]]` entries into engine configurations.
use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;

use dapctl_config::{AdapterEntry, Config, LaunchConfiguration, TaskEntry};
use dapctl_dap::{Configuration, Task};

/// Look up `name` and resolve it together with its adapter definition.
pub(crate) fn resolve(config: &Config, name: &str) -> Result<(Configuration, AdapterEntry)> {
    let (index, launch) = config.require_configuration(name).with_context(|| {
        let known: Vec<&str> = config.configurations.iter().map(|c| c.name.as_str()).collect();
        format!("known configurations: {}", known.join(", "))
    })?;
    let adapter = config.adapter(&launch.adapter_type)?.clone();
    Ok((to_configuration(config, index, launch)?, adapter))
}

fn to_configuration(config: &Config, index: usize, launch: &LaunchConfiguration) -> Result<Configuration> {
    let arguments = match serde_json::to_value(&launch.arguments)
        .with_context(|| format!("configuration '{}' has unsupported values", launch.name))?
    {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let mut configuration = Configuration::new(&launch.name, &launch.adapter_type, &launch.request);
    configuration.arguments = arguments;
    configuration.index = index;
    configuration.pre_debug_task = task(config, launch.pre_debug_task.as_deref())?;
    configuration.post_debug_task = task(config, launch.post_debug_task.as_deref())?;
    Ok(configuration)
}

fn task(config: &Config, name: Option<&str>) -> Result<Option<Task>> {
    let Some(name) = name else {
        return Ok(None);
    };
    Ok(Some(to_task(name, config.task(name)?)))
}

fn to_task(name: &str, entry: &TaskEntry) -> Task {
    Task {
        name: name.to_string(),
        command: entry.command.clone(),
        args: entry.args.clone(),
        cwd: entry.cwd.clone(),
        env: entry
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<HashMap<_, _>>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIG: &str = r#"
[adapters.lldb]
command = "lldb-dap"

[tasks.build]
command = "cargo"
args = ["build"]
env = { RUSTFLAGS = "-g" }

[[configurations]]
name = "Attach"
type = "lldb"
request = "attach"
pid = 42

[[configurations]]
name = "Run"
type = "lldb"
pre_debug_task = "build"
program = "target/debug/app"
args = ["--verbose"]
stopOnEntry = true
"#;

    #[test]
    fn resolves_arguments_index_and_tasks() {
        let config = dapctl_config::load_from_str(CONFIG).unwrap();
        let (configuration, adapter) = resolve(&config, "Run").unwrap();

        assert_eq!(adapter.command, "lldb-dap");
        assert_eq!(configuration.index, 1);
        assert_eq!(configuration.id(), "configuration_Run_1");
        assert_eq!(configuration.request, "launch");
        assert_eq!(configuration.arguments["program"], json!("target/debug/app"));
        assert_eq!(configuration.arguments["args"], json!(["--verbose"]));
        assert_eq!(configuration.arguments["stopOnEntry"], json!(true));
        assert!(!configuration.arguments.contains_key("pre_debug_task"));

        let build = configuration.pre_debug_task.unwrap();
        assert_eq!(build.name, "build");
        assert_eq!(build.args, vec!["build".to_string()]);
        assert_eq!(build.env["RUSTFLAGS"], "-g");
        assert!(configuration.post_debug_task.is_none());
    }

    #[test]
    fn attach_keeps_request_kind() {
        let config = dapctl_config::load_from_str(CONFIG).unwrap();
        let (configuration, _) = resolve(&config, "Attach").unwrap();
        assert_eq!(configuration.request, "attach");
        assert_eq!(configuration.arguments["pid"], json!(42));
    }

    #[test]
    fn unknown_configuration_lists_known_names() {
        let config = dapctl_config::load_from_str(CONFIG).unwrap();
        let err = format!("{:#}", resolve(&config, "Test").unwrap_err());
        assert!(err.contains("no configuration named 'Test'"));
        assert!(err.contains("Attach, Run"));
    }
}
