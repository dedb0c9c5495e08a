//! One debug adapter conversation.
//!
//! A [`Session`] owns the [`Client`] for its adapter, walks the state
//! machine `Stopped -> Starting -> Running <-> Paused -> Stopping -> Stopped`,
//! tracks threads, frames, scopes, modules and sources, and keeps the
//! shared [`Breakpoints`] in sync with the adapter. Observers learn about
//! changes through [`SessionListener::on_session_event`].
//!
//! State lives behind one `parking_lot` mutex that is never held across
//! an `.await` or while calling out to the listener.
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::adapter::{AdapterConfiguration, Configuration, Task};
use crate::breakpoints::{
    BreakpointKey, BreakpointResult, Breakpoints, BreakpointsEvent, SendTarget, SourceBreakpoint,
};
use crate::capabilities::DapCapabilities;
use crate::client::{Client, ClientListener};
use crate::error::DapError;
use crate::protocol::{
    self, BreakpointEventBody, Capabilities, CompletionItem, CompletionsArguments,
    CompletionsResponse, ContinueResponse, ContinuedEventBody, DataBreakpointInfoArguments,
    DataBreakpointInfoResponse, DisassembleArguments, DisassembleResponse, EvaluateArguments,
    EvaluateResponse, ExceptionFilterOptions, ExceptionInfoResponse, InitializeRequestArguments,
    LoadedSourceEventBody, Module, ModuleEventBody, OutputEventBody, ProcessEventBody,
    ReadMemoryArguments, ReadMemoryResponse, RunInTerminalRequestArguments, RunInTerminalResponse,
    Scope, ScopesResponse, SetBreakpointsArguments, SetBreakpointsResponse,
    SetExceptionBreakpointsArguments, SetVariableArguments, SetVariableResponse, Source,
    SourceArguments, SourceResponse, StackFrame, StackTraceArguments, StackTraceResponse,
    StepArguments, StoppedEventBody, TerminatedEventBody, ThreadArguments, ThreadsResponse,
    Variable, VariablesResponse,
};
use crate::thread::Thread;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
}

impl SessionState {
    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user asked for it.
    Manual,
    /// Torn down by its owner before it finished.
    Cancelled,
    /// Starting the adapter, `initialize`, or `launch`/`attach` failed.
    LaunchError,
    /// The pre debug task failed.
    BuildFailed,
    /// The adapter connection went away without a `terminated` event.
    TerminatedUnexpectedly,
    /// The adapter ended the session.
    Terminated,
}

/// Change notifications raised by a session, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Status text or name changed.
    Updated,
    SelectedFrame(Option<StackFrame>),
    Output(OutputEventBody),
    UpdatedModules,
    UpdatedSources,
    UpdatedVariables,
    UpdatedThreads,
    /// Teardown is complete.
    Finished,
}

/// The owner of a session: receives its events and runs tasks and
/// terminals for it.
#[async_trait]
pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, session: &Session, event: SessionEvent);

    async fn on_task_request(&self, session: &Session, task: &Task) -> Result<(), DapError>;

    async fn on_terminal_request(
        &self,
        session: &Session,
        request: &RunInTerminalRequestArguments,
    ) -> Result<RunInTerminalResponse, DapError>;
}

/// Extra knobs for [`Session::new`].
#[derive(Clone, Default)]
pub struct LaunchOptions {
    /// Restart data from a previous `terminated` event.
    pub restart: Option<Value>,
    pub no_debug: bool,
    pub parent: Option<Arc<Session>>,
}

enum LaunchOutcome {
    Started,
    BuildFailed,
}

struct SessionData {
    state: SessionState,
    status: String,
    stop_reason: Option<StopReason>,
    configuration: Configuration,
    capabilities: DapCapabilities,
    client: Option<Client>,
    client_started: bool,
    launched: bool,
    launch_request: bool,
    stop_requested: bool,
    terminated_event: Option<TerminatedEventBody>,
    finishing: bool,

    threads: Vec<i64>,
    threads_for_id: HashMap<i64, Thread>,
    all_threads_stopped: bool,
    selected_explicitly: bool,
    selected_thread: Option<i64>,
    selected_frame: Option<StackFrame>,
    variables: Vec<Scope>,
    modules: Vec<Module>,
    sources: BTreeMap<String, Source>,
    breakpoints_for_id: HashMap<i64, BreakpointKey>,
    process: Option<ProcessEventBody>,
}

impl SessionData {
    fn thread_mut(&mut self, id: i64) -> &mut Thread {
        let stopped = self.all_threads_stopped;
        self.threads_for_id
            .entry(id)
            .or_insert_with(|| Thread::new(id, "??", stopped))
    }

    fn command_thread(&self) -> Result<i64, DapError> {
        self.selected_thread
            .or_else(|| self.threads.first().copied())
            .ok_or(DapError::NoThreads)
    }
}

/// One debuggee conversation.
pub struct Session {
    id: SessionId,
    adapter: Arc<dyn AdapterConfiguration>,
    breakpoints: Arc<Breakpoints>,
    listener: Weak<dyn SessionListener>,
    parent: Mutex<Option<Weak<Session>>>,
    children: Mutex<Vec<Weak<Session>>>,
    restart: Option<Value>,
    no_debug: bool,
    data: Mutex<SessionData>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    launch_task: Mutex<Option<AbortHandle>>,
    finished: watch::Sender<bool>,
    self_ref: Weak<Session>,
}

impl Session {
    pub fn new(
        adapter: Arc<dyn AdapterConfiguration>,
        configuration: Configuration,
        breakpoints: Arc<Breakpoints>,
        listener: Weak<dyn SessionListener>,
        options: LaunchOptions,
    ) -> Arc<Self> {
        let (finished, _) = watch::channel(false);
        let parent = options.parent;
        let session = Arc::new_cyclic(|self_ref: &Weak<Session>| Session {
            id: SessionId::next(),
            adapter,
            breakpoints,
            listener,
            parent: Mutex::new(parent.as_ref().map(Arc::downgrade)),
            children: Mutex::new(Vec::new()),
            restart: options.restart,
            no_debug: options.no_debug,
            data: Mutex::new(SessionData {
                state: SessionState::Stopped,
                status: String::new(),
                stop_reason: None,
                configuration,
                capabilities: DapCapabilities::default(),
                client: None,
                client_started: false,
                launched: false,
                launch_request: true,
                stop_requested: false,
                terminated_event: None,
                finishing: false,
                threads: Vec::new(),
                threads_for_id: HashMap::new(),
                all_threads_stopped: false,
                selected_explicitly: false,
                selected_thread: None,
                selected_frame: None,
                variables: Vec::new(),
                modules: Vec::new(),
                sources: BTreeMap::new(),
                breakpoints_for_id: HashMap::new(),
                process: None,
            }),
            tasks: Mutex::new(Vec::new()),
            launch_task: Mutex::new(None),
            finished,
            self_ref: self_ref.clone(),
        });
        if let Some(parent) = parent {
            parent.children.lock().push(Arc::downgrade(&session));
        }
        session
    }

    // -- accessors -------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Configuration name, else the debuggee process name.
    pub fn name(&self) -> String {
        let data = self.data.lock();
        if !data.configuration.name.is_empty() {
            return data.configuration.name.clone();
        }
        match &data.process {
            Some(process) => process.name.clone(),
            None => "Untitled".to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.data.lock().state
    }

    pub fn status(&self) -> String {
        self.data.lock().status.clone()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.data.lock().stop_reason
    }

    pub fn configuration(&self) -> Configuration {
        self.data.lock().configuration.clone()
    }

    pub fn capabilities(&self) -> DapCapabilities {
        self.data.lock().capabilities.clone()
    }

    pub fn adapter(&self) -> &Arc<dyn AdapterConfiguration> {
        &self.adapter
    }

    pub fn breakpoints(&self) -> &Arc<Breakpoints> {
        &self.breakpoints
    }

    /// Threads from the last `threads` response, in adapter order.
    pub fn threads(&self) -> Vec<Thread> {
        let data = self.data.lock();
        data.threads
            .iter()
            .filter_map(|id| data.threads_for_id.get(id).cloned())
            .collect()
    }

    /// Any thread ever seen, including ones no longer reported.
    pub fn thread(&self, id: i64) -> Option<Thread> {
        self.data.lock().threads_for_id.get(&id).cloned()
    }

    pub fn selected_thread(&self) -> Option<Thread> {
        let data = self.data.lock();
        data.selected_thread
            .and_then(|id| data.threads_for_id.get(&id).cloned())
    }

    pub fn selected_frame(&self) -> Option<StackFrame> {
        self.data.lock().selected_frame.clone()
    }

    pub fn is_selected_explicitly(&self) -> bool {
        self.data.lock().selected_explicitly
    }

    pub fn all_threads_stopped(&self) -> bool {
        self.data.lock().all_threads_stopped
    }

    /// Scopes of the selected frame.
    pub fn variables(&self) -> Vec<Scope> {
        self.data.lock().variables.clone()
    }

    pub fn modules(&self) -> Vec<Module> {
        self.data.lock().modules.clone()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.data.lock().sources.values().cloned().collect()
    }

    pub fn process(&self) -> Option<ProcessEventBody> {
        self.data.lock().process.clone()
    }

    pub fn parent(&self) -> Option<Arc<Session>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<Session>> {
        self.children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.data.lock().stop_requested
    }

    // -- plumbing --------------------------------------------------------

    fn arc(&self) -> Result<Arc<Session>, DapError> {
        self.self_ref.upgrade().ok_or(DapError::Ended)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_session_event(self, event);
        }
    }

    /// Spawn work that is aborted when the session stops.
    fn spawn_tracked<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(session) = self.self_ref.upgrade() else {
            return;
        };
        let handle = tokio::spawn(f(session));
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Spawn teardown work that must outlive the session's own tasks.
    fn spawn_untracked<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(session) = self.self_ref.upgrade() {
            tokio::spawn(f(session));
        }
    }

    fn change_state(&self, next: SessionState) -> bool {
        {
            let mut data = self.data.lock();
            if data.state == next {
                return false;
            }
            if !data.state.can_transition_to(next) {
                tracing::warn!(
                    "session {:?}: refusing state change {:?} -> {:?}",
                    self.id,
                    data.state,
                    next
                );
                return false;
            }
            tracing::debug!("session {:?}: {:?} -> {:?}", self.id, data.state, next);
            data.state = next;
        }
        self.emit(SessionEvent::StateChanged(next));
        true
    }

    fn set_status(&self, status: &str) {
        {
            let mut data = self.data.lock();
            if data.status == status {
                return;
            }
            data.status = status.to_string();
        }
        self.emit(SessionEvent::Updated);
    }

    fn console_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.emit(SessionEvent::Output(OutputEventBody::new("debugger.error", message)));
    }

    fn console_info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(SessionEvent::Output(OutputEventBody::new("debugger.info", message)));
    }

    fn client(&self) -> Result<Client, DapError> {
        let data = self.data.lock();
        if !data.client_started {
            return Err(DapError::NotStarted);
        }
        data.client.clone().ok_or(DapError::Ended)
    }

    /// Send a raw request to the adapter.
    pub async fn request(&self, command: &str, arguments: Value) -> Result<Value, DapError> {
        self.client()?.send_request(command, Some(arguments)).await
    }

    async fn request_typed<A, R>(&self, command: &str, arguments: &A) -> Result<R, DapError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client()?.request(command, arguments).await
    }

    // -- lifecycle -------------------------------------------------------

    /// Start the adapter and run the launch/attach handshake.
    ///
    /// On failure the session is stopped with [`StopReason::LaunchError`]
    /// and the error is returned. A launch cancelled by [`stop`](Self::stop)
    /// returns `Ok`.
    pub async fn launch(&self) -> Result<(), DapError> {
        {
            let mut data = self.data.lock();
            if data.launched {
                return Err(DapError::AlreadyLaunched);
            }
            data.launched = true;
        }

        let session = self.arc()?;
        let handle = tokio::spawn(async move { session.launch_inner().await });
        *self.launch_task.lock() = Some(handle.abort_handle());
        let outcome = handle.await;
        self.launch_task.lock().take();

        match outcome {
            Ok(Ok(LaunchOutcome::Started)) => Ok(()),
            Ok(Ok(LaunchOutcome::BuildFailed)) => {
                self.stop_session(StopReason::BuildFailed).await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.console_error(e.to_string());
                self.stop_session(StopReason::LaunchError).await;
                Err(e)
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!("session {:?}: launch cancelled", self.id);
                Ok(())
            }
            Err(e) => {
                let e = DapError::Other(format!("launch task failed: {e}"));
                self.console_error(e.to_string());
                self.stop_session(StopReason::LaunchError).await;
                Err(e)
            }
        }
    }

    async fn launch_inner(self: Arc<Self>) -> Result<LaunchOutcome, DapError> {
        self.change_state(SessionState::Starting);
        self.watch_breakpoints();

        let configuration = self.data.lock().configuration.clone();
        let configuration = self.adapter.configuration_resolve(configuration).await?;
        self.data.lock().configuration = configuration.clone();

        let version = self
            .adapter
            .installed_version()
            .ok_or_else(|| DapError::NotInstalled(self.adapter.type_name().to_string()))?;

        if let Some(task) = &configuration.pre_debug_task {
            self.set_status("Running pre debug task");
            if !self.run_task("pre_debug_task", task).await {
                return Ok(LaunchOutcome::BuildFailed);
            }
        }

        self.set_status("Starting");
        tracing::info!(
            "-- adapter: type={} version={}",
            self.adapter.type_name(),
            version
        );
        let transport = self
            .adapter
            .start(&configuration)
            .await
            .map_err(|e| match e {
                DapError::AdapterStart(_) => e,
                other => DapError::AdapterStart(other.to_string()),
            })?;

        let listener: Weak<dyn ClientListener> = self.self_ref.clone();
        let client = Client::start(self.adapter.type_name(), transport, listener)?;
        {
            let mut data = self.data.lock();
            data.client = Some(client);
            data.client_started = true;
        }

        let capabilities: Capabilities = self
            .request_typed(
                "initialize",
                &InitializeRequestArguments::for_adapter(&configuration.adapter_type),
            )
            .await?;
        let capabilities = DapCapabilities::from_initialize_response(&capabilities);
        self.data.lock().capabilities = capabilities.clone();

        self.breakpoints
            .filters
            .update(capabilities.exception_breakpoint_filters);

        let mut arguments = configuration.request_arguments();
        if let Some(restart) = &self.restart {
            arguments["__restart"] = restart.clone();
        }
        if self.no_debug {
            arguments["noDebug"] = Value::Bool(true);
        }

        match configuration.request.as_str() {
            "launch" => {
                self.data.lock().launch_request = true;
                self.request("launch", arguments).await?;
            }
            "attach" => {
                self.data.lock().launch_request = false;
                self.request("attach", arguments).await?;
            }
            other => return Err(DapError::InvalidRequest(other.to_string())),
        }

        self.adapter.did_start_debugging(&self);

        // Baseline threads after launch/attach.
        self.refresh_threads();

        self.set_status("Running");
        self.change_state(SessionState::Running);
        self.refresh_state();
        Ok(LaunchOutcome::Started)
    }

    async fn run_task(&self, name: &str, task: &Task) -> bool {
        let Some(listener) = self.listener.upgrade() else {
            return false;
        };
        match listener.on_task_request(self, task).await {
            Ok(()) => true,
            Err(e) => {
                self.console_error(format!("{name}: {e}"));
                false
            }
        }
    }

    /// Ask the adapter to end the debuggee.
    ///
    /// Uses `terminate` for launched sessions whose adapter supports it and
    /// then waits for the `terminated` event; otherwise sends `disconnect`
    /// and tears down. Calling it again while a stop is pending forces an
    /// immediate `disconnect` and teardown.
    pub async fn stop(&self) -> Result<(), DapError> {
        let (client, already_requested, use_terminate) = {
            let data = self.data.lock();
            (
                data.client.clone(),
                data.stop_requested,
                data.launch_request && data.capabilities.supports_terminate_request,
            )
        };

        let Some(client) = client else {
            self.stop_session(StopReason::Manual).await;
            return Ok(());
        };

        if already_requested {
            tracing::info!("session {:?}: forcing stop", self.id);
            if let Err(e) = client.send_nowait(
                "disconnect",
                Some(json!({"restart": false, "terminateDebuggee": true})),
            ) {
                tracing::warn!("forced disconnect failed: {}", e);
            }
            self.stop_session(StopReason::Manual).await;
            return Ok(());
        }

        self.data.lock().stop_requested = true;
        self.set_status("Stop Requested");
        self.change_state(SessionState::Stopping);

        if use_terminate {
            match self
                .request_typed::<_, Value>("terminate", &protocol::TerminateArguments { restart: Some(false) })
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => tracing::warn!("terminate failed: {}", e),
            }
        }

        if let Err(e) = self
            .request_typed::<_, Value>(
                "disconnect",
                &protocol::DisconnectArguments {
                    restart: false,
                    terminate_debuggee: true,
                },
            )
            .await
        {
            tracing::warn!("disconnect failed: {}", e);
        }

        self.stop_session(StopReason::Manual).await;
        Ok(())
    }

    /// Tear down the adapter connection, run the post debug task and end
    /// in `Stopped`. Later calls are no-ops.
    pub(crate) async fn stop_session(&self, reason: StopReason) {
        let (client, post_task, never_started) = {
            let mut data = self.data.lock();
            if data.finishing {
                return;
            }
            data.finishing = true;
            data.stop_reason = Some(reason);
            (
                data.client.take(),
                data.configuration.post_debug_task.clone(),
                data.state == SessionState::Stopped,
            )
        };

        if never_started {
            self.finished.send_replace(true);
            return;
        }

        self.change_state(SessionState::Stopping);
        self.dispose_adapter_session(client);

        if let Some(task) = post_task {
            self.set_status("Running post debug task");
            self.run_task("post_debug_task", &task).await;
        }

        self.set_status("Ended");
        self.change_state(SessionState::Stopped);
        tracing::info!("session {:?} ended: {:?}", self.id, reason);
        self.emit(SessionEvent::Finished);
        self.finished.send_replace(true);
    }

    fn dispose_adapter_session(&self, client: Option<Client>) {
        if let Some(launch) = self.launch_task.lock().take() {
            launch.abort();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        self.breakpoints.clear_session_results(self.id);
        {
            let mut data = self.data.lock();
            data.breakpoints_for_id.clear();
            data.stop_requested = false;
        }

        if let Some(client) = client {
            self.adapter.did_stop_debugging(self);
            client.dispose();
        }
    }

    /// Resolves once the session reached `Stopped` and finished teardown.
    pub async fn wait(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Release the adapter and detach from the session hierarchy.
    pub fn dispose(&self) {
        let client = {
            let mut data = self.data.lock();
            if !data.finishing {
                data.finishing = true;
                data.stop_reason.get_or_insert(StopReason::Cancelled);
            }
            data.client.take()
        };
        self.dispose_adapter_session(client);
        self.finished.send_replace(true);

        if let Some(parent) = self.parent.lock().take().and_then(|p| p.upgrade()) {
            parent
                .children
                .lock()
                .retain(|child| child.upgrade().map_or(false, |c| c.id != self.id));
        }
        for child in self.children.lock().drain(..) {
            if let Some(child) = child.upgrade() {
                child.parent.lock().take();
            }
        }
    }

    // -- breakpoints -----------------------------------------------------

    fn watch_breakpoints(&self) {
        let mut events = self.breakpoints.subscribe();
        let weak = self.self_ref.clone();
        self.spawn_tracked(move |_| async move {
            while let Some(event) = events.recv().await {
                let BreakpointsEvent::Send(target) = event else {
                    continue;
                };
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.push_breakpoints(target).await;
            }
        });
    }

    async fn push_breakpoints(&self, target: SendTarget) {
        if self.data.lock().client.is_none() {
            return;
        }
        match target {
            SendTarget::SourceFile(file) => {
                let breakpoints = self.breakpoints.source.breakpoints_for_file(&file);
                self.set_breakpoints_for_file(file, breakpoints).await;
            }
            SendTarget::Function => self.set_function_breakpoints().await,
            SendTarget::Data => {
                if self.capabilities().supports_data_breakpoints {
                    self.set_data_breakpoints().await;
                }
            }
            SendTarget::Filters => self.set_exception_breakpoint_filters().await,
        }
    }

    /// Push every breakpoint family concurrently and wait for all of them.
    pub async fn add_breakpoints(&self) {
        if self.data.lock().client.is_none() {
            return;
        }

        let mut pushes: Vec<BoxFuture<'_, ()>> = vec![
            self.set_exception_breakpoint_filters().boxed(),
            self.set_function_breakpoints().boxed(),
        ];
        for (file, breakpoints) in self.breakpoints.source.breakpoints_per_file() {
            pushes.push(self.set_breakpoints_for_file(file, breakpoints).boxed());
        }
        if self.capabilities().supports_data_breakpoints {
            pushes.push(self.set_data_breakpoints().boxed());
        }
        join_all(pushes).await;
    }

    fn apply_results(&self, keys: &[BreakpointKey], results: Vec<protocol::Breakpoint>) {
        for (key, result) in keys.iter().zip(results) {
            if let Some(id) = result.id {
                self.data.lock().breakpoints_for_id.insert(id, *key);
            }
            self.breakpoints.set_result(*key, self.id, result.into());
        }
    }

    fn fail_results(&self, keys: &[BreakpointKey], message: &str) {
        for key in keys {
            self.breakpoints
                .set_result(*key, self.id, BreakpointResult::failed(message));
        }
    }

    async fn set_exception_breakpoint_filters(&self) {
        let enabled = self.breakpoints.filters.enabled();
        let arguments = SetExceptionBreakpointsArguments {
            filters: enabled.iter().map(|f| f.dap.filter.clone()).collect(),
            filter_options: enabled
                .into_iter()
                .map(|f| ExceptionFilterOptions {
                    filter_id: f.dap.filter,
                    condition: f.condition,
                })
                .collect(),
        };
        if let Err(e) = self
            .request_typed::<_, Value>("setExceptionBreakpoints", &arguments)
            .await
        {
            self.console_error(format!("Error while exception filters: {e}"));
        }
    }

    async fn set_function_breakpoints(&self) {
        let breakpoints: Vec<_> = self
            .breakpoints
            .function
            .all()
            .into_iter()
            .filter(|b| b.enabled)
            .collect();
        let keys: Vec<BreakpointKey> = breakpoints
            .iter()
            .map(|b| BreakpointKey::Function(b.id))
            .collect();

        if !self.capabilities().supports_function_breakpoints {
            if !breakpoints.is_empty() {
                let message = DapError::Unsupported("function breakpoints").to_string();
                self.console_error(message.clone());
                self.fail_results(&keys, &message);
            }
            return;
        }

        let dap: Vec<_> = breakpoints.into_iter().map(|b| b.dap).collect();
        let response: Result<SetBreakpointsResponse, _> = self
            .request_typed("setFunctionBreakpoints", &json!({ "breakpoints": dap }))
            .await;
        match response {
            Ok(response) => self.apply_results(&keys, response.breakpoints),
            Err(e) => {
                self.console_error(format!("Error while adding function breakpoints: {e}"));
                self.fail_results(&keys, &e.to_string());
            }
        }
    }

    async fn set_data_breakpoints(&self) {
        let breakpoints: Vec<_> = self
            .breakpoints
            .data
            .all()
            .into_iter()
            .filter(|b| b.enabled)
            .collect();
        let keys: Vec<BreakpointKey> = breakpoints.iter().map(|b| BreakpointKey::Data(b.id)).collect();
        let dap: Vec<_> = breakpoints.into_iter().map(|b| b.dap).collect();

        let response: Result<SetBreakpointsResponse, _> = self
            .request_typed("setDataBreakpoints", &json!({ "breakpoints": dap }))
            .await;
        match response {
            Ok(response) => self.apply_results(&keys, response.breakpoints),
            Err(e) => {
                self.console_error(format!("Error while adding data breakpoints: {e}"));
                self.fail_results(&keys, &e.to_string());
            }
        }
    }

    async fn set_breakpoints_for_file(&self, file: PathBuf, breakpoints: Vec<SourceBreakpoint>) {
        let capabilities = self.capabilities();
        let mut enabled = Vec::new();
        for breakpoint in breakpoints {
            if breakpoint.dap.hit_condition.is_some() && !capabilities.supports_hit_conditional_breakpoints {
                self.console_error(DapError::Unsupported("hit condition breakpoints").to_string());
            }
            if breakpoint.dap.log_message.is_some() && !capabilities.supports_log_points {
                self.console_error(DapError::Unsupported("log points").to_string());
            }
            if breakpoint.dap.condition.is_some() && !capabilities.supports_conditional_breakpoints {
                self.console_error(DapError::Unsupported("conditional breakpoints").to_string());
            }
            if breakpoint.enabled {
                enabled.push(breakpoint);
            }
        }

        let keys: Vec<BreakpointKey> = enabled.iter().map(|b| BreakpointKey::Source(b.id)).collect();
        let arguments = SetBreakpointsArguments {
            source: Source::from_path(file.to_string_lossy()),
            lines: enabled.iter().map(|b| b.dap.line).collect(),
            breakpoints: enabled.into_iter().map(|b| b.dap).collect(),
        };

        let response = self
            .request_typed::<_, SetBreakpointsResponse>("setBreakpoints", &arguments)
            .await
            .and_then(|response| {
                if response.breakpoints.len() != keys.len() {
                    return Err(DapError::Other("expected #breakpoints to match results".into()));
                }
                Ok(response)
            });

        match response {
            Ok(response) => self.apply_results(&keys, response.breakpoints),
            Err(e) => {
                self.console_error(format!("Error while adding breakpoints: {e}"));
                self.fail_results(&keys, &e.to_string());
            }
        }
    }

    // -- threads and selection -----------------------------------------

    /// Re-fetch the thread list in the background.
    pub fn refresh_threads(&self) {
        self.spawn_tracked(|session| async move {
            if let Err(e) = session.fetch_threads().await {
                tracing::warn!("refreshing threads failed: {}", e);
            }
        });
    }

    async fn fetch_threads(&self) -> Result<(), DapError> {
        // Some adapters reject a missing arguments object.
        let response: ThreadsResponse = self.request_typed("threads", &json!({})).await?;
        {
            let mut data = self.data.lock();
            data.threads.clear();
            for thread in response.threads {
                data.thread_mut(thread.id).name = thread.name;
                data.threads.push(thread.id);
            }
        }
        self.emit(SessionEvent::UpdatedThreads);
        Ok(())
    }

    fn refresh_state(&self) {
        let next = {
            let data = self.data.lock();
            if !matches!(data.state, SessionState::Running | SessionState::Paused) {
                return;
            }
            let paused = data
                .command_thread()
                .ok()
                .and_then(|id| data.threads_for_id.get(&id))
                .map_or(false, |thread| thread.stopped);
            if paused {
                SessionState::Paused
            } else {
                SessionState::Running
            }
        };
        self.set_status(if next == SessionState::Paused { "Paused" } else { "Running" });
        self.change_state(next);
    }

    fn select(&self, thread: Option<i64>, frame: Option<StackFrame>, explicitly: bool) {
        {
            let mut data = self.data.lock();
            data.selected_explicitly = explicitly;
            data.selected_thread = thread;
            data.selected_frame = frame.clone();
            if frame.is_none() {
                data.variables.clear();
            }
        }
        self.emit(SessionEvent::SelectedFrame(frame.clone()));

        match frame {
            Some(frame) => self.spawn_tracked(|session| async move {
                if let Err(e) = session.refresh_scopes(&frame).await {
                    tracing::warn!("refreshing scopes failed: {}", e);
                }
            }),
            None => self.emit(SessionEvent::UpdatedVariables),
        }
    }

    /// Select a thread and frame on behalf of the user.
    pub fn set_selected(&self, thread_id: i64, frame: Option<StackFrame>) {
        self.data.lock().thread_mut(thread_id);
        self.select(Some(thread_id), frame, true);
        self.refresh_state();
    }

    /// Stack frames of a stopped thread, fetched once per stop.
    pub async fn thread_frames(&self, thread_id: i64) -> Result<Vec<StackFrame>, DapError> {
        let generation = {
            let data = self.data.lock();
            let thread = data
                .threads_for_id
                .get(&thread_id)
                .ok_or_else(|| DapError::Other(format!("unknown thread {thread_id}")))?;
            if !thread.stopped {
                return Err(DapError::Other(
                    "Cannot get children of thread that is not stopped".into(),
                ));
            }
            if let Some(frames) = thread.frames() {
                return Ok(frames.to_vec());
            }
            thread.generation()
        };

        let frames = self.stack_trace(thread_id).await?;
        if let Some(thread) = self.data.lock().threads_for_id.get_mut(&thread_id) {
            thread.set_frames(generation, frames.clone());
        }
        Ok(frames)
    }

    fn expand_thread(&self, thread_id: i64) {
        self.spawn_tracked(move |session| async move {
            let frames = match session.thread_frames(thread_id).await {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::debug!("expanding thread {} failed: {}", thread_id, e);
                    return;
                }
            };
            let frame = {
                let data = session.data.lock();
                if data.selected_frame.is_some()
                    || data.selected_explicitly
                    || data.selected_thread != Some(thread_id)
                {
                    return;
                }
                match frames.iter().find(|f| !f.is_subtle()).or_else(|| frames.first()) {
                    Some(frame) => frame.clone(),
                    None => return,
                }
            };
            session.select(Some(thread_id), Some(frame), false);
            session.emit(SessionEvent::UpdatedThreads);
            session.refresh_state();
        });
    }

    fn on_stopped_event(&self, stopped: StoppedEventBody) {
        let select = {
            let mut data = self.data.lock();
            if stopped.all_threads_stopped == Some(true) {
                data.all_threads_stopped = true;
                for id in data.threads.clone() {
                    data.thread_mut(id).set_stopped(None);
                }
            }

            let stopped_id = stopped.thread_id.or_else(|| data.threads.first().copied());
            match stopped_id {
                Some(id) => {
                    // The thread may not be in `threads` yet.
                    data.thread_mut(id).set_stopped(Some(&stopped));
                    (!data.selected_explicitly).then_some(id)
                }
                None => None,
            }
        };

        if let Some(id) = select {
            self.select(Some(id), None, false);
            self.expand_thread(id);
        }

        self.emit(SessionEvent::UpdatedThreads);
        self.refresh_threads();
        self.refresh_state();
    }

    fn on_continued_event(&self, continued: ContinuedEventBody) {
        // A missing flag means every thread resumed.
        let all = continued.all_threads_continued.unwrap_or(true);
        self.mark_continued(continued.thread_id, all, None);
    }

    /// Mark `thread_id` (or every thread when `all`) as running. With
    /// `since`, threads that stopped or ran again after those generations
    /// were taken are left alone.
    fn mark_continued(&self, thread_id: i64, all: bool, since: Option<&HashMap<i64, u64>>) {
        let deselect = {
            let mut data = self.data.lock();
            let mut ids: Vec<i64> = if all {
                data.threads_for_id.keys().copied().collect()
            } else {
                Vec::new()
            };
            if !ids.contains(&thread_id) {
                ids.push(thread_id);
            }

            let mut continued = Vec::new();
            for id in ids {
                if let Some(since) = since {
                    let current = data.threads_for_id.get(&id).map(Thread::generation);
                    if current != since.get(&id).copied() {
                        continue;
                    }
                }
                data.thread_mut(id).set_continued();
                continued.push(id);
            }
            if all && !continued.is_empty() {
                data.all_threads_stopped = false;
            }

            let selected_ran = data
                .selected_thread
                .map_or(false, |id| continued.contains(&id));
            selected_ran || (since.is_none() && all)
        };

        if deselect {
            self.select(None, None, false);
        }
        self.emit(SessionEvent::UpdatedThreads);
        self.refresh_state();
    }

    /// Thread generations before a run command, so a stop that overtakes
    /// the response is not undone by it.
    fn thread_generations(&self, thread_id: i64) -> HashMap<i64, u64> {
        let mut data = self.data.lock();
        data.thread_mut(thread_id);
        data.threads_for_id
            .iter()
            .map(|(id, thread)| (*id, thread.generation()))
            .collect()
    }

    fn command_thread(&self) -> Result<i64, DapError> {
        self.data.lock().command_thread()
    }

    // -- commands --------------------------------------------------------

    pub async fn resume(&self) -> Result<(), DapError> {
        let thread_id = self.command_thread()?;
        let since = self.thread_generations(thread_id);
        let response: ContinueResponse = self
            .request_typed("continue", &ThreadArguments { thread_id })
            .await?;
        // Missing means every thread resumed.
        let all = response.all_threads_continued.unwrap_or(true);
        self.mark_continued(thread_id, all, Some(&since));
        Ok(())
    }

    pub async fn reverse_continue(&self) -> Result<(), DapError> {
        if !self.capabilities().supports_step_back {
            let e = DapError::Unsupported("stepping backwards");
            self.console_error(e.to_string());
            return Err(e);
        }
        let thread_id = self.command_thread()?;
        let since = self.thread_generations(thread_id);
        let response: ContinueResponse = self
            .request_typed("reverseContinue", &ThreadArguments { thread_id })
            .await?;
        let all = response.all_threads_continued.unwrap_or(true);
        self.mark_continued(thread_id, all, Some(&since));
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), DapError> {
        let thread_id = self.command_thread()?;
        self.request_typed::<_, Value>("pause", &ThreadArguments { thread_id })
            .await?;
        Ok(())
    }

    async fn step(&self, command: &str, granularity: Option<&str>) -> Result<(), DapError> {
        let thread_id = self.command_thread()?;
        let since = self.thread_generations(thread_id);
        self.request_typed::<_, Value>(
            command,
            &StepArguments {
                thread_id,
                granularity: granularity.map(str::to_string),
            },
        )
        .await?;
        self.mark_continued(thread_id, false, Some(&since));
        Ok(())
    }

    pub async fn step_over(&self, granularity: Option<&str>) -> Result<(), DapError> {
        self.step("next", granularity).await
    }

    pub async fn step_in(&self, granularity: Option<&str>) -> Result<(), DapError> {
        self.step("stepIn", granularity).await
    }

    pub async fn step_out(&self, granularity: Option<&str>) -> Result<(), DapError> {
        self.step("stepOut", granularity).await
    }

    pub async fn step_back(&self, granularity: Option<&str>) -> Result<(), DapError> {
        if !self.capabilities().supports_step_back {
            let e = DapError::Unsupported("stepping backwards");
            self.console_error(e.to_string());
            return Err(e);
        }
        self.step("stepBack", granularity).await
    }

    /// Evaluate `expression` and print the result to the console.
    pub async fn evaluate(&self, expression: &str, context: &str) -> Result<(), DapError> {
        let response = self.evaluate_expression(expression, Some(context)).await?;
        let result = response.result.ok_or(DapError::NoResult)?;
        let mut output = OutputEventBody::new("console", format!("{result}\n"));
        output.variables_reference = Some(response.variables_reference);
        self.emit(SessionEvent::Output(output));
        Ok(())
    }

    /// Evaluate in the selected frame. A response without a result is an error.
    pub async fn evaluate_expression(
        &self,
        expression: &str,
        context: Option<&str>,
    ) -> Result<EvaluateResponse, DapError> {
        let frame_id = self.selected_frame().map(|f| f.id);
        let response: EvaluateResponse = self
            .request_typed(
                "evaluate",
                &EvaluateArguments {
                    expression: expression.to_string(),
                    frame_id,
                    context: context.map(str::to_string),
                },
            )
            .await?;
        if response.result.is_none() {
            return Err(DapError::NoResult);
        }
        Ok(response)
    }

    pub async fn exception_info(&self, thread_id: i64) -> Result<ExceptionInfoResponse, DapError> {
        self.request_typed("exceptionInfo", &ThreadArguments { thread_id })
            .await
    }

    pub async fn read_memory(
        &self,
        memory_reference: &str,
        count: i64,
        offset: i64,
    ) -> Result<ReadMemoryResponse, DapError> {
        self.request_typed(
            "readMemory",
            &ReadMemoryArguments {
                memory_reference: memory_reference.to_string(),
                count,
                offset,
            },
        )
        .await
    }

    pub async fn disassemble(
        &self,
        memory_reference: &str,
        instruction_offset: i64,
        instruction_count: i64,
    ) -> Result<DisassembleResponse, DapError> {
        self.request_typed(
            "disassemble",
            &DisassembleArguments {
                memory_reference: memory_reference.to_string(),
                instruction_offset,
                instruction_count,
                resolve_symbols: true,
            },
        )
        .await
    }

    pub async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>, DapError> {
        let response: StackTraceResponse = self
            .request_typed(
                "stackTrace",
                &StackTraceArguments {
                    thread_id,
                    start_frame: None,
                    levels: None,
                },
            )
            .await?;
        Ok(response.stack_frames)
    }

    pub async fn completions(&self, text: &str, column: i64) -> Result<Vec<CompletionItem>, DapError> {
        let frame_id = self.selected_frame().map(|f| f.id);
        let response: CompletionsResponse = self
            .request_typed(
                "completions",
                &CompletionsArguments {
                    frame_id,
                    text: text.to_string(),
                    column,
                },
            )
            .await?;
        Ok(response.targets)
    }

    pub async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetVariableResponse, DapError> {
        self.request_typed(
            "setVariable",
            &SetVariableArguments {
                variables_reference,
                name: name.to_string(),
                value: value.to_string(),
            },
        )
        .await
    }

    pub async fn data_breakpoint_info(
        &self,
        variables_reference: i64,
        name: &str,
    ) -> Result<DataBreakpointInfoResponse, DapError> {
        self.request_typed(
            "dataBreakpointInfo",
            &DataBreakpointInfoArguments {
                variables_reference,
                name: name.to_string(),
            },
        )
        .await
    }

    /// Fetch the scopes of `frame` into [`variables`](Self::variables).
    pub async fn refresh_scopes(&self, frame: &StackFrame) -> Result<(), DapError> {
        let response: ScopesResponse = self
            .request_typed("scopes", &json!({ "frameId": frame.id }))
            .await?;
        self.data.lock().variables = response.scopes;
        self.emit(SessionEvent::UpdatedVariables);
        Ok(())
    }

    /// Content and mime type of a source.
    pub async fn get_source(&self, source: &Source) -> Result<(String, Option<String>), DapError> {
        let source_reference = source.source_reference.unwrap_or(0);
        let response: SourceResponse = self
            .request_typed(
                "source",
                &SourceArguments {
                    source: Source {
                        path: source.path.clone(),
                        source_reference: source.source_reference,
                        ..Source::default()
                    },
                    source_reference,
                },
            )
            .await?;
        Ok((response.content, response.mime_type))
    }

    /// Children of a variables reference. With `without_names` the names
    /// are blanked and values cut to their first line, the way output
    /// event variables are shown.
    pub async fn get_variables(
        &self,
        variables_reference: i64,
        without_names: bool,
    ) -> Result<Vec<Variable>, DapError> {
        let response: VariablesResponse = self
            .request_typed(
                "variables",
                &json!({ "variablesReference": variables_reference }),
            )
            .await?;
        let mut variables = response.variables;
        if without_names {
            for variable in &mut variables {
                variable.name.clear();
                if let Some(first) = variable.value.lines().next() {
                    variable.value = first.to_string();
                }
            }
        }
        Ok(variables)
    }

    // -- adapter events --------------------------------------------------

    async fn on_initialized_event(&self) {
        self.add_breakpoints().await;

        if self.capabilities().supports_configuration_done_request {
            if let Err(e) = self.request("configurationDone", json!({})).await {
                self.console_error(format!("configurationDone failed: {e}"));
            }
        }
    }

    fn on_terminated_event(&self, event: TerminatedEventBody) {
        self.data.lock().terminated_event = Some(event);
        self.spawn_untracked(|session| async move {
            let reason = if session.is_stop_requested() {
                StopReason::Manual
            } else {
                StopReason::Terminated
            };
            if let Err(e) = session
                .request_typed::<_, Value>(
                    "disconnect",
                    &protocol::DisconnectArguments {
                        restart: false,
                        terminate_debuggee: true,
                    },
                )
                .await
            {
                tracing::debug!("disconnect after terminated failed: {}", e);
            }
            session.stop_session(reason).await;
        });
    }

    fn on_breakpoint_event(&self, event: BreakpointEventBody) {
        let Some(id) = event.breakpoint.id else {
            tracing::debug!("breakpoint event without id");
            return;
        };
        let key = self.data.lock().breakpoints_for_id.get(&id).copied();
        match key {
            Some(key) => self
                .breakpoints
                .set_result(key, self.id, event.breakpoint.into()),
            None => tracing::debug!("Breakpoint for id not found {}", id),
        }
    }

    fn on_module_event(&self, event: ModuleEventBody) {
        {
            let mut data = self.data.lock();
            let existing = data.modules.iter().position(|m| m.id == event.module.id);
            match (event.reason.as_str(), existing) {
                ("new" | "changed", Some(index)) => data.modules[index] = event.module,
                ("new" | "changed", None) => data.modules.push(event.module),
                ("removed", Some(index)) => {
                    data.modules.remove(index);
                }
                _ => {}
            }
        }
        self.emit(SessionEvent::UpdatedModules);
    }

    fn on_loaded_source_event(&self, event: LoadedSourceEventBody) {
        {
            let mut data = self.data.lock();
            let key = event.source.key();
            match event.reason.as_str() {
                "new" | "changed" => {
                    data.sources.insert(key, event.source);
                }
                "removed" => {
                    data.sources.remove(&key);
                }
                _ => {}
            }
        }
        self.emit(SessionEvent::UpdatedSources);
    }

    fn on_process_event(&self, event: ProcessEventBody) {
        self.data.lock().process = Some(event);
        self.emit(SessionEvent::Updated);
    }
}

fn parse_body<T: DeserializeOwned>(event: &str, body: Value) -> Option<T> {
    match serde_json::from_value(body) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::error!("!! invalid {} event: {}", event, e);
            None
        }
    }
}

#[async_trait]
impl ClientListener for Session {
    fn on_event(&self, event: &str, body: Value) {
        if self.data.lock().client.is_none() {
            tracing::debug!("on_event: discarded transport ended");
            return;
        }

        match event {
            "initialized" => self.spawn_tracked(|session| async move {
                session.on_initialized_event().await;
            }),
            "output" => {
                if let Some(output) = parse_body::<OutputEventBody>(event, body) {
                    self.emit(SessionEvent::Output(output));
                }
            }
            "continued" => {
                if let Some(continued) = parse_body(event, body) {
                    self.on_continued_event(continued);
                }
            }
            "stopped" => {
                if let Some(stopped) = parse_body(event, body) {
                    self.on_stopped_event(stopped);
                }
            }
            "terminated" => {
                let terminated = parse_body(event, body).unwrap_or_default();
                self.on_terminated_event(terminated);
            }
            "thread" => self.refresh_threads(),
            "breakpoint" => {
                if let Some(breakpoint) = parse_body(event, body) {
                    self.on_breakpoint_event(breakpoint);
                }
            }
            "module" => {
                if let Some(module) = parse_body(event, body) {
                    self.on_module_event(module);
                }
            }
            "loadedSource" => {
                if let Some(source) = parse_body(event, body) {
                    self.on_loaded_source_event(source);
                }
            }
            "process" => {
                if let Some(process) = parse_body(event, body) {
                    self.on_process_event(process);
                }
            }
            other => self.adapter.on_custom_event(self, other, &body),
        }
    }

    async fn on_reverse_request(&self, command: &str, arguments: Value) -> Result<Value, DapError> {
        if command == "runInTerminal" {
            let request: RunInTerminalRequestArguments = serde_json::from_value(arguments)
                .map_err(|e| DapError::InvalidResponse(format!("runInTerminal: {e}")))?;
            let listener = self.listener.upgrade().ok_or(DapError::Ended)?;
            let response = match listener.on_terminal_request(self, &request).await {
                Ok(response) => response,
                Err(e) => {
                    self.console_error(e.to_string());
                    return Err(e);
                }
            };
            return serde_json::to_value(response).map_err(|e| DapError::Other(e.to_string()));
        }

        match self.adapter.on_custom_request(self, command, &arguments).await {
            Some(result) => result,
            None => Err(DapError::Other(format!("reverse request not implemented {command}"))),
        }
    }

    fn on_transport_closed(&self, reason: &str) {
        let stop_reason = {
            let data = self.data.lock();
            if data.stop_requested {
                StopReason::Manual
            } else if data.terminated_event.is_some() {
                StopReason::Terminated
            } else {
                StopReason::TerminatedUnexpectedly
            }
        };
        if stop_reason == StopReason::TerminatedUnexpectedly {
            self.console_info(format!("Debug adapter exited unexpectedly: {reason}"));
        }
        self.spawn_untracked(move |session| async move {
            session.stop_session(stop_reason).await;
        });
    }
}
