//! Debug adapters defined in `[adapters.<type>]`.
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dapctl_config::{AdapterEntry, AdapterTransport};
use dapctl_dap::{AdapterConfiguration, Configuration, DapError, Session, Transport};

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_DELAY: Duration = Duration::from_millis(100);

/// An adapter started as a child process.
pub(crate) struct ProcessAdapter {
    type_name: String,
    entry: AdapterEntry,
    /// Children serving tcp adapters, by configuration id. Stdio children
    /// are owned by their transport.
    servers: Mutex<HashMap<String, Child>>,
}

impl ProcessAdapter {
    pub(crate) fn new(type_name: impl Into<String>, entry: AdapterEntry) -> Self {
        Self {
            type_name: type_name.into(),
            entry,
            servers: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, stdio: bool) -> Command {
        let mut command = Command::new(&self.entry.command);
        command.args(&self.entry.args).envs(&self.entry.env);
        if stdio {
            command.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            command.stdin(Stdio::null()).stdout(Stdio::null());
        }
        command.stderr(Stdio::piped());
        command
    }

    fn spawn(&self, stdio: bool) -> Result<Child, DapError> {
        let mut child = self
            .command(stdio)
            .spawn()
            .map_err(|e| DapError::AdapterStart(format!("{}: {}", self.entry.command, e)))?;
        tracing::info!("started adapter {} (pid {})", self.type_name, child.id());
        if let Some(stderr) = child.stderr.take() {
            let name = self.type_name.clone();
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::debug!("[{}] {}", name, line);
                }
            });
        }
        Ok(child)
    }

    async fn connect(&self, port: u16) -> Result<Transport, DapError> {
        let mut last_error = None;
        for _ in 0..CONNECT_ATTEMPTS {
            match Transport::connect_tcp(("127.0.0.1", port)) {
                Ok(transport) => return Ok(transport),
                Err(e) => last_error = Some(e),
            }
            tokio::time::sleep(CONNECT_DELAY).await;
        }
        Err(last_error.unwrap_or_else(|| DapError::AdapterStart(format!("could not connect to port {port}"))))
    }

    fn stop_server(&self, id: &str) {
        let Some(mut child) = self.servers.lock().remove(id) else {
            return;
        };
        kill(&self.type_name, &mut child);
    }
}

fn kill(type_name: &str, child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("adapter {} already exited: {}", type_name, e);
    }
    let _ = child.wait();
}

#[async_trait]
impl AdapterConfiguration for ProcessAdapter {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn installed_version(&self) -> Option<String> {
        find_executable(&self.entry.command)?;
        Some(self.entry.version.clone().unwrap_or_else(|| "unknown".to_string()))
    }

    async fn start(&self, configuration: &Configuration) -> Result<Transport, DapError> {
        match self.entry.transport {
            AdapterTransport::Stdio => Transport::from_child(self.spawn(true)?),
            AdapterTransport::Tcp => {
                let port = self
                    .entry
                    .port
                    .ok_or_else(|| DapError::AdapterStart("tcp adapter without a port".into()))?;
                let mut child = self.spawn(false)?;
                let transport = match self.connect(port).await {
                    Ok(transport) => transport,
                    Err(e) => {
                        kill(&self.type_name, &mut child);
                        return Err(e);
                    }
                };
                if let Some(mut previous) = self.servers.lock().insert(configuration.id(), child) {
                    kill(&self.type_name, &mut previous);
                }
                Ok(transport)
            }
        }
    }

    fn did_stop_debugging(&self, session: &Session) {
        self.stop_server(&session.configuration().id());
    }
}

/// Resolve `command` the way the shell would: paths are checked directly,
/// bare names are searched in `PATH`.
fn find_executable(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(command: &str) -> AdapterEntry {
        AdapterEntry {
            command: command.to_string(),
            args: Vec::new(),
            transport: AdapterTransport::Stdio,
            port: None,
            version: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn missing_command_is_not_installed() {
        let adapter = ProcessAdapter::new("ghost", entry("definitely-not-a-real-adapter-binary"));
        assert_eq!(adapter.installed_version(), None);
    }

    #[test]
    fn version_defaults_to_unknown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let exe = tmp.path().join("adapter");
        std::fs::write(&exe, "").unwrap();

        let adapter = ProcessAdapter::new("fake", entry(exe.to_str().unwrap()));
        assert_eq!(adapter.installed_version().as_deref(), Some("unknown"));

        let mut versioned = entry(exe.to_str().unwrap());
        versioned.version = Some("1.2.0".into());
        let adapter = ProcessAdapter::new("fake", versioned);
        assert_eq!(adapter.installed_version().as_deref(), Some("1.2.0"));
    }

    #[test]
    fn find_executable_checks_explicit_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(find_executable(tmp.path().join("nope").to_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn start_reports_spawn_failure() {
        let adapter = ProcessAdapter::new("ghost", entry("/nonexistent/adapter"));
        let configuration = Configuration::new("Run", "ghost", "launch");
        let err = adapter.start(&configuration).await.err().unwrap();
        assert!(matches!(err, DapError::AdapterStart(_)));
    }

    #[tokio::test]
    async fn tcp_adapter_requires_port() {
        let mut tcp = entry("/nonexistent/adapter");
        tcp.transport = AdapterTransport::Tcp;
        let adapter = ProcessAdapter::new("ghost", tcp);
        let configuration = Configuration::new("Run", "ghost", "launch");
        let err = adapter.start(&configuration).await.err().unwrap();
        assert!(matches!(err, DapError::AdapterStart(ref m) if m.contains("port")));
    }

    fn tcp_entry(command: &str, args: &[&str], port: u16) -> AdapterEntry {
        let mut tcp = entry(command);
        tcp.args = args.iter().map(|s| s.to_string()).collect();
        tcp.transport = AdapterTransport::Tcp;
        tcp.port = Some(port);
        tcp
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn failed_tcp_connect_kills_the_server() {
        let adapter = ProcessAdapter::new("slow", tcp_entry("sleep", &["30"], free_port()));
        let configuration = Configuration::new("Run", "slow", "launch");
        assert!(adapter.start(&configuration).await.is_err());
        assert!(adapter.servers.lock().is_empty());
    }

    #[tokio::test]
    async fn tcp_servers_are_stopped_per_configuration() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let adapter = ProcessAdapter::new("slow", tcp_entry("sleep", &["30"], port));

        let run = Configuration::new("Run", "slow", "launch");
        let test = Configuration::new("Test", "slow", "launch");
        let _run_transport = adapter.start(&run).await.unwrap();
        let _test_transport = adapter.start(&test).await.unwrap();
        assert_eq!(adapter.servers.lock().len(), 2);

        adapter.stop_server(&run.id());
        let servers = adapter.servers.lock();
        assert_eq!(servers.len(), 1);
        assert!(servers.contains_key(&test.id()));
        drop(servers);
        adapter.stop_server(&test.id());
    }
}
