//! Runs pre/post debug tasks and `runInTerminal` commands as local
//! processes.
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use dapctl_dap::protocol::{RunInTerminalRequestArguments, RunInTerminalResponse};
use dapctl_dap::{DapError, Session, SessionsTasksProvider, Task};

pub(crate) struct ProcessProvider;

#[async_trait]
impl SessionsTasksProvider for ProcessProvider {
    async fn run_task(&self, session: &Session, task: &Task) -> Result<(), DapError> {
        eprintln!("[{}] running task {}", session.name(), task.name);
        let mut command = Command::new(&task.command);
        command.args(&task.args).envs(&task.env).stdin(Stdio::null());
        if let Some(cwd) = &task.cwd {
            command.current_dir(cwd);
        }

        let status = command
            .status()
            .await
            .map_err(|e| DapError::Task(format!("{}: {}", task.name, e)))?;
        if status.success() {
            tracing::info!("task {} finished", task.name);
            return Ok(());
        }
        let code = status
            .code()
            .map_or_else(|| "a signal".to_string(), |code| code.to_string());
        Err(DapError::Task(format!("{} exited with {}", task.name, code)))
    }

    async fn create_terminal(
        &self,
        _session: &Session,
        request: &RunInTerminalRequestArguments,
    ) -> Result<RunInTerminalResponse, DapError> {
        let mut child = terminal_command(request)?
            .spawn()
            .map_err(|e| DapError::Other(format!("runInTerminal failed: {e}")))?;
        let process_id = child.id();
        tracing::info!("runInTerminal started {:?} (pid {:?})", request.args, process_id);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("terminal process exited: {}", status),
                Err(e) => tracing::warn!("waiting on terminal process failed: {}", e),
            }
        });
        Ok(RunInTerminalResponse {
            process_id,
            shell_process_id: None,
        })
    }
}

fn terminal_command(request: &RunInTerminalRequestArguments) -> Result<Command, DapError> {
    let (program, args) = request
        .args
        .split_first()
        .ok_or_else(|| DapError::InvalidRequest("runInTerminal without a command".into()))?;
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    if !request.cwd.is_empty() {
        command.current_dir(&request.cwd);
    }
    for (key, value) in request.env.iter().flatten() {
        match value {
            Some(value) => command.env(key, value),
            None => command.env_remove(key),
        };
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(args: &[&str]) -> RunInTerminalRequestArguments {
        RunInTerminalRequestArguments {
            kind: Some("integrated".into()),
            title: None,
            cwd: String::new(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: None,
        }
    }

    #[test]
    fn terminal_command_needs_a_program() {
        let err = terminal_command(&request(&[])).err().unwrap();
        assert!(matches!(err, DapError::InvalidRequest(_)));
    }

    #[test]
    fn terminal_command_applies_env() {
        let mut req = request(&["/bin/true", "-x"]);
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), Some("1".to_string()));
        env.insert("BAR".to_string(), None);
        req.env = Some(env);

        let command = terminal_command(&req).unwrap();
        let inner = command.as_std();
        assert_eq!(inner.get_program(), "/bin/true");
        let envs: HashMap<_, _> = inner.get_envs().collect();
        assert_eq!(envs[std::ffi::OsStr::new("FOO")], Some(std::ffi::OsStr::new("1")));
        assert_eq!(envs[std::ffi::OsStr::new("BAR")], None);
    }
}
