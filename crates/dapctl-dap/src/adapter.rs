//! Resolved launch configurations and the collaborators a session needs
//! from its host: an adapter that supplies a transport, and a provider
//! that runs tasks and terminals.
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DapError;
use crate::protocol::{RunInTerminalRequestArguments, RunInTerminalResponse};
use crate::session::Session;
use crate::transport::Transport;

/// A command run before or after a debug session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Task {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl Task {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }
}

/// A launch or attach configuration with variables already expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub name: String,
    /// Adapter type name.
    pub adapter_type: String,
    /// `launch` or `attach`.
    pub request: String,
    /// Everything else; sent verbatim as the launch/attach arguments.
    pub arguments: Map<String, Value>,
    pub pre_debug_task: Option<Task>,
    pub post_debug_task: Option<Task>,
    /// Position in the configuration list, part of the identity.
    pub index: usize,
}

impl Configuration {
    pub fn new(name: impl Into<String>, adapter_type: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter_type: adapter_type.into(),
            request: request.into(),
            arguments: Map::new(),
            pre_debug_task: None,
            post_debug_task: None,
            index: 0,
        }
    }

    pub fn with_argument(mut self, key: &str, value: Value) -> Self {
        self.arguments.insert(key.to_string(), value);
        self
    }

    /// Identity used to replace a running session of the same configuration.
    pub fn id(&self) -> String {
        format!("configuration_{}_{}", self.name, self.index)
    }

    /// Arguments for the `launch`/`attach` request.
    pub(crate) fn request_arguments(&self) -> Value {
        let mut arguments = self.arguments.clone();
        arguments.insert("name".into(), Value::String(self.name.clone()));
        arguments.insert("type".into(), Value::String(self.adapter_type.clone()));
        arguments.insert("request".into(), Value::String(self.request.clone()));
        Value::Object(arguments)
    }
}

/// Per adapter type knowledge: how to start it and its quirks.
#[async_trait]
pub trait AdapterConfiguration: Send + Sync {
    fn type_name(&self) -> &str;

    /// `None` when the adapter is not installed.
    fn installed_version(&self) -> Option<String>;

    /// Start the adapter and connect to it.
    async fn start(&self, configuration: &Configuration) -> Result<Transport, DapError>;

    /// Fill in adapter specific configuration before launch.
    async fn configuration_resolve(&self, configuration: Configuration) -> Result<Configuration, DapError> {
        Ok(configuration)
    }

    fn did_start_debugging(&self, _session: &Session) {}

    fn did_stop_debugging(&self, _session: &Session) {}

    /// An event the session does not handle itself.
    fn on_custom_event(&self, _session: &Session, event: &str, _body: &Value) {
        tracing::debug!("unhandled event: {}", event);
    }

    /// A reverse request the session does not handle itself. `None` means
    /// not implemented.
    async fn on_custom_request(
        &self,
        _session: &Session,
        _command: &str,
        _arguments: &Value,
    ) -> Option<Result<Value, DapError>> {
        None
    }
}

/// Runs tasks and terminals on behalf of sessions.
#[async_trait]
pub trait SessionsTasksProvider: Send + Sync {
    async fn run_task(&self, session: &Session, task: &Task) -> Result<(), DapError>;

    async fn create_terminal(
        &self,
        session: &Session,
        request: &RunInTerminalRequestArguments,
    ) -> Result<RunInTerminalResponse, DapError>;
}
