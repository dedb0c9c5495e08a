//! DAP client over a single adapter transport.
//!
//! Assigns sequence numbers, tracks pending requests, and routes
//! incoming responses, events and reverse requests. Events reach the
//! listener on one dispatch task in arrival order; each reverse request
//! is answered from its own task.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::DapError;
use crate::protocol::{Message, Request, Response};
use crate::transport::{encode_message, spawn_reader, Incoming, Transport, TransportWrite};

/// Receives everything the adapter initiates.
#[async_trait]
pub trait ClientListener: Send + Sync {
    /// An adapter event. Called in arrival order.
    fn on_event(&self, event: &str, body: Value);

    /// An adapter-initiated request. The result is sent back as the response.
    async fn on_reverse_request(&self, command: &str, arguments: Value) -> Result<Value, DapError>;

    /// The transport ended. Pending requests have already been rejected.
    fn on_transport_closed(&self, reason: &str);
}

struct Inner {
    name: String,
    writer: Mutex<Option<Box<dyn TransportWrite>>>,
    dispatcher: Mutex<Dispatcher>,
    seq: AtomicI64,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

/// A DAP client connected to one adapter. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Take ownership of `transport` and start pumping messages to `listener`.
    pub fn start(
        name: impl Into<String>,
        transport: Transport,
        listener: Weak<dyn ClientListener>,
    ) -> Result<Self, DapError> {
        let (reader, writer) = transport.into_parts();
        let inner = Arc::new(Inner {
            name: name.into(),
            writer: Mutex::new(Some(writer)),
            dispatcher: Mutex::new(Dispatcher::new()),
            seq: AtomicI64::new(1),
            dispatch_task: Mutex::new(None),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(reader, tx)?;

        let task = tokio::spawn(dispatch_loop(Arc::downgrade(&inner), listener, rx));
        *inner.dispatch_task.lock() = Some(task);
        tracing::info!("{}: client started", inner.name);
        Ok(Self { inner })
    }

    /// Adapter name used in log lines.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn next_seq(&self) -> i64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn write(&self, message: &Message) -> Result<(), DapError> {
        let value = serde_json::to_value(message).map_err(|e| DapError::Other(e.to_string()))?;
        let mut writer = self.inner.writer.lock();
        let writer = writer.as_mut().ok_or(DapError::Ended)?;
        writer
            .write(&encode_message(&value))
            .map_err(|e| DapError::Transport(e.to_string()))
    }

    /// Send a request and wait for its response body.
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<Value, DapError> {
        let seq = self.next_seq();
        let rx = self.inner.dispatcher.lock().register_request(seq);

        tracing::debug!(
            "<- {}({}) :: {}",
            command,
            seq,
            arguments.as_ref().map(|a| a.to_string()).unwrap_or_default()
        );
        let message = Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        if let Err(e) = self.write(&message) {
            self.inner.dispatcher.lock().cancel(seq);
            tracing::error!("!! {}({}) :: {}", command, seq, e);
            return Err(e);
        }

        let result = rx.await.map_err(|_| DapError::Disposed)?;
        match &result {
            Ok(body) => tracing::debug!("-> {}({}) :: {}", command, seq, body),
            Err(e) => tracing::debug!("!! {}({}) :: {}", command, seq, e),
        }
        result
    }

    /// Typed wrapper around [`send_request`](Self::send_request).
    pub async fn request<A, R>(&self, command: &str, arguments: &A) -> Result<R, DapError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let arguments = serde_json::to_value(arguments).map_err(|e| DapError::Other(e.to_string()))?;
        let body = self.send_request(command, Some(arguments)).await?;
        serde_json::from_value(body).map_err(|e| DapError::InvalidResponse(format!("{command}: {e}")))
    }

    /// Write a request without waiting for, or tracking, its response.
    pub fn send_nowait(&self, command: &str, arguments: Option<Value>) -> Result<(), DapError> {
        let seq = self.next_seq();
        tracing::debug!("<- {}({}) :: (no wait)", command, seq);
        self.write(&Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        }))
    }

    /// Answer an adapter-initiated request.
    pub fn send_response(&self, request: &Request, result: Result<Value, DapError>) -> Result<(), DapError> {
        let response = match result {
            Ok(body) => {
                tracing::debug!("<- {}({}) :: {}", request.command, request.seq, body);
                Response {
                    seq: self.next_seq(),
                    request_seq: request.seq,
                    success: true,
                    command: request.command.clone(),
                    message: None,
                    body: Some(body),
                }
            }
            Err(e) => {
                tracing::error!("!! {}({}) :: {}", request.command, request.seq, e);
                Response {
                    seq: self.next_seq(),
                    request_seq: request.seq,
                    success: false,
                    command: request.command.clone(),
                    message: Some(e.to_string()),
                    body: None,
                }
            }
        };
        self.write(&Message::Response(response))
    }

    /// How many requests are still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.lock().pending_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.writer.lock().is_none()
    }

    /// Close the transport and reject everything still pending.
    pub fn dispose(&self) {
        if let Some(task) = self.inner.dispatch_task.lock().take() {
            task.abort();
        }
        if let Some(mut writer) = self.inner.writer.lock().take() {
            writer.dispose();
            tracing::info!("{}: client disposed", self.inner.name);
        }
        self.inner.dispatcher.lock().cancel_all();
    }
}

async fn dispatch_loop(
    inner: Weak<Inner>,
    listener: Weak<dyn ClientListener>,
    mut rx: mpsc::UnboundedReceiver<Incoming>,
) {
    while let Some(incoming) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match incoming {
            Incoming::Message(value) => {
                let message: Message = match serde_json::from_value(value) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!("!! {}: unrecognized message: {}", inner.name, e);
                        continue;
                    }
                };
                handle_message(&inner, &listener, message);
            }
            Incoming::Closed(reason) => {
                inner.dispatcher.lock().fail_all(&reason);
                if let Some(listener) = listener.upgrade() {
                    listener.on_transport_closed(&reason);
                }
                break;
            }
        }
    }
}

fn handle_message(inner: &Arc<Inner>, listener: &Weak<dyn ClientListener>, message: Message) {
    match message {
        Message::Response(response) => {
            inner.dispatcher.lock().resolve(response);
        }
        Message::Event(event) => {
            let body = event.body.unwrap_or_else(|| json!({}));
            tracing::debug!("-> event {} :: {}", event.event, body);
            match listener.upgrade() {
                Some(listener) => listener.on_event(&event.event, body),
                None => tracing::warn!("dropping event {}: no listener", event.event),
            }
        }
        Message::Request(request) => {
            tracing::debug!(
                "-> reverse request {}({}) :: {}",
                request.command,
                request.seq,
                request.arguments.as_ref().map(|a| a.to_string()).unwrap_or_default()
            );
            let client = Client {
                inner: inner.clone(),
            };
            let listener = listener.clone();
            tokio::spawn(async move {
                let arguments = request.arguments.clone().unwrap_or_else(|| json!({}));
                let result = match listener.upgrade() {
                    Some(listener) => listener.on_reverse_request(&request.command, arguments).await,
                    None => Err(DapError::Disposed),
                };
                if let Err(e) = client.send_response(&request, result) {
                    tracing::error!("!! failed to answer {}: {}", request.command, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_transport, wait_until};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, Value)>>,
        closed: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ClientListener for Recorder {
        fn on_event(&self, event: &str, body: Value) {
            self.events.lock().push((event.to_string(), body));
        }

        async fn on_reverse_request(&self, command: &str, arguments: Value) -> Result<Value, DapError> {
            match command {
                "runInTerminal" => Ok(json!({"processId": 42, "echo": arguments["cwd"]})),
                other => Err(DapError::Other(format!("reverse request not implemented {other}"))),
            }
        }

        fn on_transport_closed(&self, reason: &str) {
            *self.closed.lock() = Some(reason.to_string());
        }
    }

    fn start() -> (Client, crate::testing::FakeAdapter, Arc<Recorder>) {
        let (transport, adapter) = fake_transport();
        let recorder = Arc::new(Recorder::default());
        let listener: Weak<dyn ClientListener> = Arc::downgrade(&recorder) as Weak<dyn ClientListener>;
        let client = Client::start("fake", transport, listener).unwrap();
        (client, adapter, recorder)
    }

    #[tokio::test]
    async fn client_initialize_roundtrip() {
        let (client, mut adapter, _recorder) = start();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("initialize", Some(json!({"adapterID": "fake"}))).await }
        });

        let request = adapter.expect_request("initialize").await;
        assert_eq!(request.seq, 1);
        assert_eq!(request.arguments.as_ref().unwrap()["adapterID"], "fake");
        adapter.respond(&request, json!({"supportsConfigurationDoneRequest": true}));

        let body = pending.await.unwrap().unwrap();
        assert_eq!(body["supportsConfigurationDoneRequest"], true);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn client_out_of_order_responses_pair_by_seq() {
        let (client, mut adapter, _recorder) = start();
        let first = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("threads", None).await }
        });
        let a = adapter.expect_request("threads").await;
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("evaluate", Some(json!({"expression": "1"}))).await }
        });
        let b = adapter.expect_request("evaluate").await;

        adapter.respond(&b, json!({"result": "1"}));
        adapter.respond(&a, json!({"threads": []}));
        // Duplicate response for an already settled request.
        adapter.respond(&b, json!({"result": "2"}));

        assert_eq!(first.await.unwrap().unwrap(), json!({"threads": []}));
        assert_eq!(second.await.unwrap().unwrap(), json!({"result": "1"}));
    }

    #[tokio::test]
    async fn client_error_response_uses_format() {
        let (client, mut adapter, _recorder) = start();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("launch", Some(json!({}))).await }
        });
        let request = adapter.expect_request("launch").await;
        adapter.respond_error_body(
            &request,
            "launch failed",
            json!({"error": {"id": 1, "format": "no program {program}", "variables": {}}}),
        );
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "no program {program}");
    }

    #[tokio::test]
    async fn client_events_delivered_in_order() {
        let (_client, mut adapter, recorder) = start();
        adapter.event("output", json!({"output": "a"}));
        adapter.event("output", json!({"output": "b"}));
        adapter.event("initialized", Value::Null);

        wait_until(|| recorder.events.lock().len() == 3).await;
        let events = recorder.events.lock().clone();
        assert_eq!(events[0].1["output"], "a");
        assert_eq!(events[1].1["output"], "b");
        assert_eq!(events[2].0, "initialized");
        assert_eq!(events[2].1, json!({}));
    }

    #[tokio::test]
    async fn client_answers_reverse_requests() {
        let (_client, mut adapter, _recorder) = start();
        let ok = adapter.reverse_request("runInTerminal", json!({"cwd": "/tmp", "args": ["a"]}));
        let response = adapter.expect_response(ok).await;
        assert!(response.success);
        assert_eq!(response.body.unwrap()["processId"], 42);

        let bad = adapter.reverse_request("startDebugging", json!({}));
        let response = adapter.expect_response(bad).await;
        assert!(!response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("reverse request not implemented startDebugging")
        );
    }

    #[tokio::test]
    async fn client_close_rejects_pending_and_notifies() {
        let (client, mut adapter, recorder) = start();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("threads", None).await }
        });
        adapter.expect_request("threads").await;
        adapter.close();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, DapError::Transport(_)));
        wait_until(|| recorder.closed.lock().is_some()).await;
    }

    #[tokio::test]
    async fn client_dispose_rejects_pending() {
        let (client, mut adapter, _recorder) = start();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send_request("threads", None).await }
        });
        adapter.expect_request("threads").await;
        client.dispose();

        let err = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DapError::Disposed));
        assert!(client.is_disposed());
        assert!(matches!(
            client.send_request("threads", None).await,
            Err(DapError::Ended)
        ));
    }

    #[tokio::test]
    async fn client_send_nowait_is_not_tracked() {
        let (client, mut adapter, _recorder) = start();
        client
            .send_nowait("disconnect", Some(json!({"restart": false})))
            .unwrap();
        let request = adapter.expect_request("disconnect").await;
        assert_eq!(client.pending_count(), 0);
        adapter.respond(&request, json!({}));
    }
}
