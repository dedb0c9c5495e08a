//! Registry of running sessions.
//!
//! [`Sessions`] owns every live [`Session`], tracks which one is active and
//! forwards their events to subscribers in the order they were raised.
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::adapter::{AdapterConfiguration, Configuration, SessionsTasksProvider, Task};
use crate::breakpoints::Breakpoints;
use crate::error::DapError;
use crate::protocol::{RunInTerminalRequestArguments, RunInTerminalResponse};
use crate::session::{LaunchOptions, Session, SessionEvent, SessionListener};

/// Notifications from the registry.
#[derive(Clone)]
pub enum SessionsEvent {
    Added(Arc<Session>),
    Removed(Arc<Session>),
    /// The active session changed.
    Selected(Option<Arc<Session>>),
    /// An event raised by one session.
    Session(Arc<Session>, SessionEvent),
}

impl std::fmt::Debug for SessionsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionsEvent::Added(s) => write!(f, "Added({:?})", s.id()),
            SessionsEvent::Removed(s) => write!(f, "Removed({:?})", s.id()),
            SessionsEvent::Selected(s) => write!(f, "Selected({:?})", s.as_ref().map(|s| s.id())),
            SessionsEvent::Session(s, event) => write!(f, "Session({:?}, {:?})", s.id(), event),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: Vec<Arc<Session>>,
    active: Option<Arc<Session>>,
}

pub struct Sessions {
    provider: Arc<dyn SessionsTasksProvider>,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionsEvent>>>,
    self_ref: Weak<Sessions>,
}

impl Sessions {
    pub fn new(provider: Arc<dyn SessionsTasksProvider>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Sessions {
            provider,
            inner: Mutex::new(Inner::default()),
            subscribers: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, event: SessionsEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Start a session for `configuration`.
    ///
    /// A running session with the same configuration identity is stopped
    /// first. The new session becomes active, launches in the background and
    /// is removed from the registry once it finishes.
    pub async fn launch(
        &self,
        breakpoints: Arc<Breakpoints>,
        adapter: Arc<dyn AdapterConfiguration>,
        configuration: Configuration,
        options: LaunchOptions,
    ) -> Result<Arc<Session>, DapError> {
        let id = configuration.id();
        let existing: Vec<Arc<Session>> = self
            .inner
            .lock()
            .sessions
            .iter()
            .filter(|s| s.configuration().id() == id)
            .cloned()
            .collect();
        for session in existing {
            tracing::info!("replacing running session {:?} for {}", session.id(), id);
            if let Err(e) = session.stop().await {
                tracing::warn!("stopping previous session failed: {}", e);
            }
        }

        let me = self.self_ref.upgrade().ok_or(DapError::Ended)?;
        let listener: Weak<dyn SessionListener> = self.self_ref.clone();
        let session = Session::new(adapter, configuration, breakpoints, listener, options);
        self.add_session(session.clone());

        let running = session.clone();
        tokio::spawn(async move {
            if let Err(e) = running.launch().await {
                tracing::warn!("session {:?} failed to launch: {}", running.id(), e);
            }
            running.wait().await;
            running.dispose();
            me.remove_session(&running);
        });
        Ok(session)
    }

    fn add_session(&self, session: Arc<Session>) {
        self.inner.lock().sessions.push(session.clone());
        self.notify(SessionsEvent::Added(session.clone()));
        self.set_active(Some(session));
    }

    fn remove_session(&self, session: &Arc<Session>) {
        let (removed, fallback, empty) = {
            let mut inner = self.inner.lock();
            let before = inner.sessions.len();
            inner.sessions.retain(|s| s.id() != session.id());
            let removed = inner.sessions.len() != before;
            let was_active = inner.active.as_ref().map(|s| s.id()) == Some(session.id());
            let fallback = was_active.then(|| {
                inner
                    .sessions
                    .iter()
                    .find(|s| !s.threads().is_empty())
                    .or_else(|| inner.sessions.first())
                    .cloned()
            });
            (removed, fallback, inner.sessions.is_empty())
        };
        if !removed {
            return;
        }

        self.notify(SessionsEvent::Removed(session.clone()));
        if let Some(fallback) = fallback {
            self.set_active(fallback);
        }
        if empty {
            session.breakpoints().clear_session_data();
        }
    }

    pub fn active(&self) -> Option<Arc<Session>> {
        self.inner.lock().active.clone()
    }

    pub fn has_active(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// The active session, or [`DapError::NoActiveSession`].
    pub fn require_active(&self) -> Result<Arc<Session>, DapError> {
        self.active().ok_or(DapError::NoActiveSession)
    }

    pub fn set_active(&self, session: Option<Arc<Session>>) {
        {
            let mut inner = self.inner.lock();
            let current = inner.active.as_ref().map(|s| s.id());
            if current == session.as_ref().map(|s| s.id()) {
                return;
            }
            inner.active = session.clone();
        }
        self.notify(SessionsEvent::Selected(session));
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().sessions.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    pub async fn stop_all(&self) {
        for session in self.sessions() {
            if let Err(e) = session.stop().await {
                tracing::warn!("stopping session {:?} failed: {}", session.id(), e);
            }
        }
    }

    /// Drop every session without waiting for the adapters.
    pub fn dispose(&self) {
        let sessions = {
            let mut inner = self.inner.lock();
            inner.active = None;
            std::mem::take(&mut inner.sessions)
        };
        for session in sessions {
            session.dispose();
        }
        self.subscribers.lock().clear();
    }
}

#[async_trait]
impl SessionListener for Sessions {
    fn on_session_event(&self, session: &Session, event: SessionEvent) {
        let Some(session) = self
            .inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.id() == session.id())
            .cloned()
        else {
            return;
        };
        let selects = matches!(event, SessionEvent::SelectedFrame(Some(_)));
        self.notify(SessionsEvent::Session(session.clone(), event));
        if selects {
            self.set_active(Some(session));
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testing::{fake_transport, wait_until, FakeAdapter, FakeAdapterConfiguration, RecordingProvider};
    use serde_json::json;

    fn registry() -> (Arc<Sessions>, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::default());
        (Sessions::new(provider.clone()), provider)
    }

    async fn start(
        sessions: &Sessions,
        breakpoints: &Arc<Breakpoints>,
        name: &str,
    ) -> (Arc<Session>, FakeAdapter) {
        let (transport, mut adapter) = fake_transport();
        let session = sessions
            .launch(
                breakpoints.clone(),
                Arc::new(FakeAdapterConfiguration::new("fake", transport)),
                Configuration::new(name, "fake", "launch"),
                LaunchOptions::default(),
            )
            .await
            .unwrap();
        adapter.accept_launch(json!({})).await;
        wait_until(|| session.state() == SessionState::Running).await;
        (session, adapter)
    }

    #[tokio::test]
    async fn sessions_new_session_becomes_active() {
        let (sessions, _) = registry();
        let mut events = sessions.subscribe();
        let breakpoints = Arc::new(Breakpoints::new());
        let (a, _adapter_a) = start(&sessions, &breakpoints, "A").await;
        assert_eq!(sessions.active().unwrap().id(), a.id());

        let (b, _adapter_b) = start(&sessions, &breakpoints, "B").await;
        assert_eq!(sessions.active().unwrap().id(), b.id());
        assert_eq!(sessions.sessions().len(), 2);

        assert!(matches!(events.recv().await, Some(SessionsEvent::Added(s)) if s.id() == a.id()));
        assert!(matches!(events.recv().await, Some(SessionsEvent::Selected(Some(s))) if s.id() == a.id()));
    }

    #[tokio::test]
    async fn sessions_finished_session_is_removed_with_fallback() {
        let (sessions, _) = registry();
        let breakpoints = Arc::new(Breakpoints::new());
        let (a, _adapter_a) = start(&sessions, &breakpoints, "A").await;
        let (b, adapter_b) = start(&sessions, &breakpoints, "B").await;

        adapter_b.close();
        wait_until(|| sessions.sessions().len() == 1).await;
        assert_eq!(sessions.active().unwrap().id(), a.id());
        assert_eq!(b.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn sessions_last_removal_clears_active_and_session_data() {
        let (sessions, _) = registry();
        let mut events = sessions.subscribe();
        let breakpoints = Arc::new(Breakpoints::new());
        breakpoints
            .data
            .add(
                crate::protocol::DataBreakpointInfoResponse {
                    data_id: Some("x".into()),
                    description: "x".into(),
                    can_persist: Some(false),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        let (_a, adapter) = start(&sessions, &breakpoints, "A").await;
        adapter.close();
        wait_until(|| sessions.is_empty()).await;
        assert!(!sessions.has_active());
        assert!(breakpoints.data.all().is_empty());

        let mut removed = false;
        while let Ok(event) = events.try_recv() {
            removed |= matches!(event, SessionsEvent::Removed(_));
        }
        assert!(removed);
    }

    #[tokio::test]
    async fn sessions_same_configuration_replaces_running_session() {
        let (sessions, _) = registry();
        let breakpoints = Arc::new(Breakpoints::new());
        let (first, mut adapter) = start(&sessions, &breakpoints, "A").await;

        let replace = {
            let sessions = sessions.clone();
            let breakpoints = breakpoints.clone();
            tokio::spawn(async move { start(&sessions, &breakpoints, "A").await })
        };
        adapter.handle("disconnect", json!({})).await;
        let (second, _adapter) = replace.await.unwrap();

        assert_eq!(first.state(), SessionState::Stopped);
        wait_until(|| sessions.sessions().len() == 1).await;
        assert_eq!(sessions.sessions()[0].id(), second.id());
    }

    #[tokio::test]
    async fn sessions_forward_events_and_select_on_frame() {
        let (sessions, _) = registry();
        let breakpoints = Arc::new(Breakpoints::new());
        let (a, mut adapter_a) = start(&sessions, &breakpoints, "A").await;
        let (_b, _adapter_b) = start(&sessions, &breakpoints, "B").await;
        let mut events = sessions.subscribe();

        adapter_a.event("output", json!({"category": "stdout", "output": "hi\n"}));
        adapter_a.event("stopped", json!({"threadId": 1, "reason": "pause"}));
        adapter_a
            .handle("stackTrace", json!({"stackFrames": [{"id": 4, "name": "main"}]}))
            .await;
        wait_until(|| sessions.active().map(|s| s.id()) == Some(a.id())).await;

        let mut outputs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionsEvent::Session(s, SessionEvent::Output(o)) = event {
                outputs.push((s.id(), o.output));
            }
        }
        assert_eq!(outputs, vec![(a.id(), "hi\n".to_string())]);
    }

    #[tokio::test]
    async fn sessions_route_tasks_and_terminals_to_provider() {
        let (sessions, provider) = registry();
        let breakpoints = Arc::new(Breakpoints::new());
        let (_a, mut adapter) = start(&sessions, &breakpoints, "A").await;

        let seq = adapter.reverse_request("runInTerminal", json!({"cwd": "/", "args": ["ls"]}));
        let response = adapter.expect_response(seq).await;
        assert!(response.success);
        assert_eq!(provider.terminals.lock().len(), 1);
    }

    #[tokio::test]
    async fn sessions_require_active_errors_when_empty() {
        let (sessions, _) = registry();
        assert!(matches!(sessions.require_active(), Err(DapError::NoActiveSession)));
    }

    #[tokio::test]
    async fn sessions_dispose_drops_everything() {
        let (sessions, _) = registry();
        let breakpoints = Arc::new(Breakpoints::new());
        let (a, _adapter) = start(&sessions, &breakpoints, "A").await;
        sessions.dispose();
        assert!(sessions.is_empty());
        assert!(sessions.active().is_none());
        a.wait().await;
    }
}
