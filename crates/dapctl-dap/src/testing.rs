//! In-memory adapter and recording collaborators for tests.
//!
//! [`fake_transport`] returns a [`Transport`] wired to a [`FakeAdapter`]
//! that a test drives by hand: it reads the requests the client wrote and
//! answers with responses, events and reverse requests.
use std::collections::{HashSet, VecDeque};
use std::io::{self, BufRead, Read};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::adapter::{AdapterConfiguration, Configuration, SessionsTasksProvider, Task};
use crate::error::DapError;
use crate::protocol::{Message, Request, Response, RunInTerminalRequestArguments, RunInTerminalResponse};
use crate::session::{Session, SessionEvent, SessionListener};
use crate::transport::{decode_message, encode_message, Transport, TransportWrite};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Client side reader fed by the fake adapter. `None` means end of stream.
struct ChannelReader {
    rx: std_mpsc::Receiver<Option<Vec<u8>>>,
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.buffer.len() && !self.eof {
            match self.rx.recv() {
                Ok(Some(bytes)) => {
                    self.buffer = bytes;
                    self.pos = 0;
                }
                Ok(None) | Err(_) => self.eof = true,
            }
        }
        if self.eof && self.pos >= self.buffer.len() {
            return Ok(&[]);
        }
        Ok(&self.buffer[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buffer.len());
    }
}

/// Client side writer that decodes frames and hands them to the fake adapter.
struct ChannelWriter {
    tx: mpsc::UnboundedSender<Value>,
    reader: std_mpsc::Sender<Option<Vec<u8>>>,
    buffer: Vec<u8>,
}

impl TransportWrite for ChannelWriter {
    fn write(&mut self, message: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(message);
        while let Ok((value, consumed)) = decode_message(&self.buffer) {
            self.buffer.drain(..consumed);
            self.tx
                .send(value)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fake adapter gone"))?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        // Mirrors a killed adapter process: the reader sees end of stream.
        let _ = self.reader.send(None);
    }
}

/// Build a transport connected to a scripted adapter.
pub fn fake_transport() -> (Transport, FakeAdapter) {
    let (to_client, client_rx) = std_mpsc::channel();
    let (client_tx, from_client) = mpsc::unbounded_channel();
    let transport = Transport::new(
        ChannelReader {
            rx: client_rx,
            buffer: Vec::new(),
            pos: 0,
            eof: false,
        },
        ChannelWriter {
            tx: client_tx,
            reader: to_client.clone(),
            buffer: Vec::new(),
        },
    );
    let adapter = FakeAdapter {
        to_client,
        from_client,
        backlog: VecDeque::new(),
        seq: 1000,
    };
    (transport, adapter)
}

/// The adapter end of a [`fake_transport`].
pub struct FakeAdapter {
    to_client: std_mpsc::Sender<Option<Vec<u8>>>,
    from_client: mpsc::UnboundedReceiver<Value>,
    backlog: VecDeque<Value>,
    seq: i64,
}

impl FakeAdapter {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn send(&mut self, message: Message) {
        let value = serde_json::to_value(&message).expect("serialize fake message");
        let _ = self.to_client.send(Some(encode_message(&value)));
    }

    /// Write raw bytes to the client.
    pub fn send_raw(&self, bytes: &[u8]) {
        let _ = self.to_client.send(Some(bytes.to_vec()));
    }

    async fn recv(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for the client")
            .expect("client transport dropped")
    }

    /// Next message the client wrote, in order.
    pub async fn next_message(&mut self) -> Value {
        match self.backlog.pop_front() {
            Some(value) => value,
            None => self.recv().await,
        }
    }

    fn take_backlog(&mut self, pred: impl Fn(&Value) -> bool) -> Option<Value> {
        let index = self.backlog.iter().position(pred)?;
        self.backlog.remove(index)
    }

    /// Wait for a request with `command`; other messages are kept for later.
    pub async fn expect_request(&mut self, command: &str) -> Request {
        let is_match = |v: &Value| v["type"] == "request" && v["command"] == command;
        let value = match self.take_backlog(is_match) {
            Some(value) => value,
            None => loop {
                let value = self.recv().await;
                if is_match(&value) {
                    break value;
                }
                self.backlog.push_back(value);
            },
        };
        serde_json::from_value(value).expect("malformed request")
    }

    /// Wait for the client's answer to reverse request `request_seq`.
    pub async fn expect_response(&mut self, request_seq: i64) -> Response {
        let is_match = |v: &Value| v["type"] == "response" && v["request_seq"] == request_seq;
        let value = match self.take_backlog(is_match) {
            Some(value) => value,
            None => loop {
                let value = self.recv().await;
                if is_match(&value) {
                    break value;
                }
                self.backlog.push_back(value);
            },
        };
        serde_json::from_value(value).expect("malformed response")
    }

    /// Expect `command` and answer it with `body`.
    pub async fn handle(&mut self, command: &str, body: Value) -> Request {
        let request = self.expect_request(command).await;
        self.respond(&request, body);
        request
    }

    /// Panic if the client sends `command` within a short grace period.
    pub async fn assert_no_request(&mut self, command: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
        while let Ok(Some(value)) = tokio::time::timeout_at(deadline, self.from_client.recv()).await {
            self.backlog.push_back(value);
        }
        assert!(
            !self
                .backlog
                .iter()
                .any(|v| v["type"] == "request" && v["command"] == command),
            "unexpected {command} request"
        );
    }

    pub fn respond(&mut self, request: &Request, body: Value) {
        let seq = self.next_seq();
        self.send(Message::Response(Response {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: Some(body),
        }));
    }

    pub fn respond_error(&mut self, request: &Request, message: &str) {
        let seq = self.next_seq();
        self.send(Message::Response(Response {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        }));
    }

    pub fn respond_error_body(&mut self, request: &Request, message: &str, body: Value) {
        let seq = self.next_seq();
        self.send(Message::Response(Response {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: Some(body),
        }));
    }

    pub fn event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        let body = if body.is_null() { None } else { Some(body) };
        self.send(Message::Event(crate::protocol::Event {
            seq,
            event: event.to_string(),
            body,
        }));
    }

    /// Send a reverse request and return its seq.
    pub fn reverse_request(&mut self, command: &str, arguments: Value) -> i64 {
        let seq = self.next_seq();
        self.send(Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments: Some(arguments),
        }));
        seq
    }

    /// End the stream as if the adapter process died.
    pub fn close(&self) {
        let _ = self.to_client.send(None);
    }

    /// Answer the standard startup sequence: `initialize`, then `launch`,
    /// then emit `initialized` and answer the configuration requests that
    /// follow, ending with `configurationDone` and an empty `threads`.
    pub async fn accept_launch(&mut self, capabilities: Value) {
        self.handle("initialize", capabilities.clone()).await;
        let launch = self.expect_request("launch").await;
        self.event("initialized", Value::Null);
        self.answer_breakpoint_requests().await;
        if capabilities["supportsConfigurationDoneRequest"] == true {
            self.handle("configurationDone", json!({})).await;
        }
        self.respond(&launch, json!({}));
        self.handle("threads", json!({"threads": []})).await;
    }

    /// Answer `setExceptionBreakpoints` and any other `set*Breakpoints`
    /// already in flight with verified results.
    pub async fn answer_breakpoint_requests(&mut self) {
        self.handle("setExceptionBreakpoints", json!({})).await;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        while let Ok(Some(value)) = tokio::time::timeout_at(deadline, self.from_client.recv()).await {
            self.backlog.push_back(value);
        }
        let pending: Vec<Value> = self
            .backlog
            .iter()
            .filter(|v| {
                v["type"] == "request"
                    && matches!(
                        v["command"].as_str(),
                        Some("setBreakpoints" | "setFunctionBreakpoints" | "setDataBreakpoints")
                    )
            })
            .cloned()
            .collect();
        self.backlog.retain(|v| !pending.contains(v));
        for value in pending {
            let request: Request = serde_json::from_value(value).expect("malformed request");
            let count = request
                .arguments
                .as_ref()
                .and_then(|a| a.get("breakpoints"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let breakpoints: Vec<Value> = (0..count)
                .map(|i| json!({"id": i + 1, "verified": true}))
                .collect();
            self.respond(&request, json!({"breakpoints": breakpoints}));
        }
    }
}

/// Hands out one prepared transport.
pub struct FakeAdapterConfiguration {
    type_name: String,
    installed: bool,
    transport: Mutex<Option<Transport>>,
}

impl FakeAdapterConfiguration {
    pub fn new(type_name: &str, transport: Transport) -> Self {
        Self {
            type_name: type_name.to_string(),
            installed: true,
            transport: Mutex::new(Some(transport)),
        }
    }

    /// An adapter that reports itself as not installed.
    pub fn not_installed(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            installed: false,
            transport: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AdapterConfiguration for FakeAdapterConfiguration {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn installed_version(&self) -> Option<String> {
        self.installed.then(|| "1.0.0".to_string())
    }

    async fn start(&self, _configuration: &Configuration) -> Result<Transport, DapError> {
        self.transport
            .lock()
            .take()
            .ok_or_else(|| DapError::AdapterStart("fake adapter already started".into()))
    }
}

/// Records tasks and terminals instead of running them.
#[derive(Default)]
pub struct RecordingProvider {
    pub tasks: Mutex<Vec<String>>,
    pub terminals: Mutex<Vec<RunInTerminalRequestArguments>>,
    failing_tasks: Mutex<HashSet<String>>,
}

impl RecordingProvider {
    /// Make the task named `name` fail.
    pub fn fail_task(&self, name: &str) {
        self.failing_tasks.lock().insert(name.to_string());
    }
}

#[async_trait]
impl SessionsTasksProvider for RecordingProvider {
    async fn run_task(&self, _session: &Session, task: &Task) -> Result<(), DapError> {
        self.tasks.lock().push(task.name.clone());
        if self.failing_tasks.lock().contains(&task.name) {
            return Err(DapError::Task(format!("{} exited with 1", task.name)));
        }
        Ok(())
    }

    async fn create_terminal(
        &self,
        _session: &Session,
        request: &RunInTerminalRequestArguments,
    ) -> Result<RunInTerminalResponse, DapError> {
        self.terminals.lock().push(request.clone());
        Ok(RunInTerminalResponse {
            process_id: Some(4242),
            shell_process_id: None,
        })
    }
}

/// Session listener that forwards events to a channel and delegates
/// tasks and terminals to a [`RecordingProvider`].
pub struct CollectingListener {
    pub provider: RecordingProvider,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl CollectingListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                provider: RecordingProvider::default(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl SessionListener for CollectingListener {
    fn on_session_event(&self, _session: &Session, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    async fn on_task_request(&self, session: &Session, task: &Task) -> Result<(), DapError> {
        self.provider.run_task(session, task).await
    }

    async fn on_terminal_request(
        &self,
        session: &Session,
        request: &RunInTerminalRequestArguments,
    ) -> Result<RunInTerminalResponse, DapError> {
        self.provider.create_terminal(session, request).await
    }
}

/// Poll `cond` until it holds, panicking after a timeout.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
