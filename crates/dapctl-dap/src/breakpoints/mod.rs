//! Breakpoint model shared by all sessions.
//!
//! Four independent collections (source, function, data, exception
//! filters) live in one [`Breakpoints`] set. Each collection raises
//! [`BreakpointsEvent::Send`] when a session should re-push that family and
//! [`BreakpointsEvent::Updated`] when only the displayed state changed.
//! Results reported by the adapter are kept per session.

mod data;
mod filters;
mod function;
mod source;

pub use data::{DataBreakpoint, DataBreakpointEdit, DataBreakpoints};
pub use filters::{ExceptionBreakpointsFilter, ExceptionBreakpointsFilterEdit, ExceptionBreakpointsFilters};
pub use function::{FunctionBreakpoint, FunctionBreakpointEdit, FunctionBreakpoints};
pub use source::{SourceBreakpoint, SourceBreakpointEdit, SourceBreakpoints};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::DapError;
use crate::protocol;
use crate::session::SessionId;

static NEXT_BREAKPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Local identity of a breakpoint, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId {
    pub(crate) fn next() -> Self {
        BreakpointId(NEXT_BREAKPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the adapter said about one breakpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BreakpointResult {
    pub verified: bool,
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub message: Option<String>,
    /// Adapter-assigned id, used to match later `breakpoint` events.
    pub id: Option<i64>,
}

impl BreakpointResult {
    /// An unverified result carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            verified: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

impl From<protocol::Breakpoint> for BreakpointResult {
    fn from(bp: protocol::Breakpoint) -> Self {
        Self {
            verified: bp.verified,
            line: bp.line,
            column: bp.column,
            message: bp.message,
            id: bp.id,
        }
    }
}

/// Results of one breakpoint, one per session that pushed it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BreakpointResults {
    by_session: Vec<(SessionId, BreakpointResult)>,
}

impl BreakpointResults {
    pub(crate) fn set(&mut self, session: SessionId, result: BreakpointResult) {
        match self.by_session.iter_mut().find(|(id, _)| *id == session) {
            Some((_, existing)) => *existing = result,
            None => self.by_session.push((session, result)),
        }
    }

    pub(crate) fn clear(&mut self, session: SessionId) -> bool {
        let before = self.by_session.len();
        self.by_session.retain(|(id, _)| *id != session);
        before != self.by_session.len()
    }

    /// The result shown to the user: the first verified one, else the
    /// first one recorded.
    pub fn current(&self) -> Option<&BreakpointResult> {
        self.by_session
            .iter()
            .map(|(_, r)| r)
            .find(|r| r.verified)
            .or_else(|| self.by_session.first().map(|(_, r)| r))
    }

    /// The result a specific session recorded.
    pub fn for_session(&self, session: SessionId) -> Option<&BreakpointResult> {
        self.by_session
            .iter()
            .find(|(id, _)| *id == session)
            .map(|(_, r)| r)
    }

    /// Verified when any session verified it, or when nothing has been
    /// reported yet.
    pub fn verified(&self) -> bool {
        self.current().map_or(true, |r| r.verified)
    }

    pub fn message(&self) -> Option<&str> {
        self.current().and_then(|r| r.message.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

/// Breakpoint family, used to scope update notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Source,
    Function,
    Data,
    Filter,
}

/// What a session has to push again after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// `setBreakpoints` for one file.
    SourceFile(PathBuf),
    /// `setFunctionBreakpoints`.
    Function,
    /// `setDataBreakpoints`.
    Data,
    /// `setExceptionBreakpoints`.
    Filters,
}

/// Change notification from a [`Breakpoints`] set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointsEvent {
    /// Displayed state changed; nothing needs to be sent.
    Updated(BreakpointKind),
    /// Requested state changed; sessions must re-push `SendTarget`.
    Send(SendTarget),
}

/// Session-scoped handle to a breakpoint, keyed by adapter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKey {
    Source(BreakpointId),
    Function(BreakpointId),
    Data(BreakpointId),
}

/// A snapshot of any breakpoint kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Breakpoint {
    Source(SourceBreakpoint),
    Function(FunctionBreakpoint),
    Data(DataBreakpoint),
    Filter(ExceptionBreakpointsFilter),
}

impl Breakpoint {
    pub fn name(&self) -> String {
        match self {
            Breakpoint::Source(b) => b.name(),
            Breakpoint::Function(b) => b.dap.name.clone(),
            Breakpoint::Data(b) => b.info.description.clone(),
            Breakpoint::Filter(f) => f.dap.label.clone(),
        }
    }

    /// Short marker shown next to the name.
    pub fn tag(&self) -> Option<String> {
        match self {
            Breakpoint::Source(b) => Some(b.tag()),
            Breakpoint::Function(_) => Some("ƒn".to_string()),
            Breakpoint::Data(_) => Some("0x".to_string()),
            Breakpoint::Filter(_) => None,
        }
    }

    pub fn description(&self) -> Option<String> {
        match self {
            Breakpoint::Source(b) => b.results.message().map(str::to_string),
            Breakpoint::Function(b) => b.results.message().map(str::to_string),
            Breakpoint::Data(b) => b.results.message().map(str::to_string),
            Breakpoint::Filter(f) => f.dap.description.clone(),
        }
    }

    pub fn verified(&self) -> bool {
        match self {
            Breakpoint::Source(b) => b.results.verified(),
            Breakpoint::Function(b) => b.results.verified(),
            Breakpoint::Data(b) => b.results.verified(),
            Breakpoint::Filter(_) => true,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Breakpoint::Source(b) => b.enabled,
            Breakpoint::Function(b) => b.enabled,
            Breakpoint::Data(b) => b.enabled,
            Breakpoint::Filter(f) => f.enabled,
        }
    }
}

/// Fans breakpoint events out to subscribers.
#[derive(Default)]
pub(crate) struct Notifier {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BreakpointsEvent>>>,
}

impl Notifier {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<BreakpointsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn notify(&self, event: BreakpointsEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn updated(&self, kind: BreakpointKind) {
        self.notify(BreakpointsEvent::Updated(kind));
    }

    pub(crate) fn send(&self, kind: BreakpointKind, target: SendTarget) {
        self.notify(BreakpointsEvent::Updated(kind));
        self.notify(BreakpointsEvent::Send(target));
    }
}

/// The full breakpoint set handed to every session.
pub struct Breakpoints {
    pub source: SourceBreakpoints,
    pub function: FunctionBreakpoints,
    pub data: DataBreakpoints,
    pub filters: ExceptionBreakpointsFilters,
    notifier: Arc<Notifier>,
}

impl Breakpoints {
    pub fn new() -> Self {
        let notifier = Arc::new(Notifier::default());
        Self {
            source: SourceBreakpoints::new(notifier.clone()),
            function: FunctionBreakpoints::new(notifier.clone()),
            data: DataBreakpoints::new(notifier.clone()),
            filters: ExceptionBreakpointsFilters::new(notifier.clone()),
            notifier,
        }
    }

    /// Receive every future change notification, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BreakpointsEvent> {
        self.notifier.subscribe()
    }

    /// Record `result` for the breakpoint behind `key`.
    pub fn set_result(&self, key: BreakpointKey, session: SessionId, result: BreakpointResult) {
        match key {
            BreakpointKey::Source(id) => self.source.set_result(id, session, result),
            BreakpointKey::Function(id) => self.function.set_result(id, session, result),
            BreakpointKey::Data(id) => self.data.set_result(id, session, result),
        }
    }

    /// Forget everything `session` reported.
    pub fn clear_session_results(&self, session: SessionId) {
        self.source.clear_session_results(session);
        self.function.clear_session_results(session);
        self.data.clear_session_results(session);
    }

    /// Drop state that only made sense while debugging.
    pub fn clear_session_data(&self) {
        self.data.clear_session_data();
    }

    /// Every breakpoint, grouped by kind.
    pub fn all(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = Vec::new();
        all.extend(self.filters.all().into_iter().map(Breakpoint::Filter));
        all.extend(self.function.all().into_iter().map(Breakpoint::Function));
        all.extend(self.data.all().into_iter().map(Breakpoint::Data));
        all.extend(self.source.all().into_iter().map(Breakpoint::Source));
        all
    }

    pub fn into_json(&self) -> Value {
        json!({
            "source": self.source.into_json(),
            "function": self.function.into_json(),
            "filters": self.filters.into_json(),
            "data": self.data.into_json(),
        })
    }

    /// Replace the contents with a previously saved set. Missing keys
    /// leave that collection empty.
    pub fn load_json(&self, value: &Value) -> Result<(), DapError> {
        let empty = Value::Array(Vec::new());
        self.source.load_json(value.get("source").unwrap_or(&empty))?;
        self.function.load_json(value.get("function").unwrap_or(&empty))?;
        self.filters.load_json(value.get("filters").unwrap_or(&empty))?;
        self.data.load_json(value.get("data").unwrap_or(&empty))?;
        Ok(())
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn invalid_json(kind: &str, e: serde_json::Error) -> DapError {
    DapError::Other(format!("invalid saved {kind} breakpoints: {e}"))
}

/// Empty strings clear an optional field.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(verified: bool, message: &str) -> BreakpointResult {
        BreakpointResult {
            verified,
            message: Some(message.into()),
            ..BreakpointResult::default()
        }
    }

    #[test]
    fn results_verified_without_reports() {
        let results = BreakpointResults::default();
        assert!(results.verified());
        assert!(results.current().is_none());
    }

    #[test]
    fn results_prefer_any_verified_session() {
        let mut results = BreakpointResults::default();
        results.set(SessionId(1), result(false, "no code"));
        results.set(SessionId(2), result(true, "ok"));
        assert!(results.verified());
        assert_eq!(results.message(), Some("ok"));

        assert!(results.clear(SessionId(2)));
        assert!(!results.verified());
        assert_eq!(results.message(), Some("no code"));
        assert!(!results.clear(SessionId(2)));
    }

    #[test]
    fn results_replace_same_session() {
        let mut results = BreakpointResults::default();
        results.set(SessionId(1), result(false, "first"));
        results.set(SessionId(1), result(true, "second"));
        assert_eq!(results.for_session(SessionId(1)).unwrap().message.as_deref(), Some("second"));
    }

    #[test]
    fn breakpoints_json_roundtrip_across_kinds() {
        let breakpoints = Breakpoints::new();
        breakpoints.source.add("/src/main.rs", 10, None);
        breakpoints.function.add("main");
        breakpoints.filters.update(vec![protocol::ExceptionBreakpointsFilter {
            filter: "raised".into(),
            label: "Raised Exceptions".into(),
            default: Some(true),
            ..protocol::ExceptionBreakpointsFilter::default()
        }]);

        let saved = breakpoints.into_json();
        let restored = Breakpoints::new();
        restored.load_json(&saved).unwrap();
        assert_eq!(restored.source.all().len(), 1);
        assert_eq!(restored.function.all()[0].dap.name, "main");
        assert!(restored.filters.all()[0].enabled);
        assert_eq!(restored.all().len(), 3);
    }

    #[test]
    fn breakpoints_load_rejects_malformed() {
        let breakpoints = Breakpoints::new();
        let bad = json!({"source": [{"line": "ten"}]});
        assert!(breakpoints.load_json(&bad).is_err());
    }

    #[tokio::test]
    async fn breakpoints_subscribers_see_events_in_order() {
        let breakpoints = Breakpoints::new();
        let mut events = breakpoints.subscribe();
        breakpoints.function.add("main");
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Updated(BreakpointKind::Function))
        );
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Send(SendTarget::Function))
        );
    }
}
