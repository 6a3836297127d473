//! Debug Backend: orchestrates the supervisor, client, and state tracker into the
//! uniform contract higher layers use without knowing DAP exists.
//!
//! Breakpoint validation against source is the adapter's job, not this core's: the
//! backend tracks a plain `path -> breakpoints` map and trusts the adapter to verify.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::client::{ClientEvent, DapClient};
use crate::error::DapError;
use crate::protocol;
use crate::supervisor::{AdapterSupervisor, SupervisorEvent};
use crate::tracker::StateTracker;
use crate::types::{
    AdapterDescriptor, Breakpoint, DebugConfig, DebugState, EvaluateResult, FrameInfo, FrameSource, OutputCategory, OutputEvent,
    OutputQuery, RecentOutput, RequestKind, ScopeVariables, SourceLocation, StoppedEvent, TerminatedEvent, Uri, VariableScope,
};

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_OUTPUT_LINES: usize = 1000;

/// A disposable event subscription: call [`Subscription::dispose`] to unregister.
pub struct Subscription {
    dispose_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { dispose_fn: Some(Box::new(f)) }
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.dispose_fn.take() {
            f();
        }
    }
}

#[derive(Clone)]
struct EventBus<T> {
    subscribers: Arc<Mutex<HashMap<u64, Box<dyn Fn(&T) + Send + Sync>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> EventBus<T> {
    fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, Box::new(f));
        let subscribers = self.subscribers.clone();
        Subscription::new(move || {
            subscribers.lock().unwrap().remove(&id);
        })
    }

    /// Fans out to every subscriber in registration order. A panicking subscriber is
    /// caught and logged; it never prevents the rest from observing the event.
    fn publish(&self, event: &T) {
        let subscribers: Vec<_> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().map(|(id, _)| *id).collect()
        };
        for id in subscribers {
            let subscribers_map = self.subscribers.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let guard = subscribers_map.lock().unwrap();
                if let Some(cb) = guard.get(&id) {
                    cb(event);
                }
            }));
            if result.is_err() {
                tracing::warn!("event subscriber panicked; continuing with remaining subscribers");
            }
        }
    }
}

/// Orchestrates the adapter supervisor, DAP client, and state tracker into the backend
/// contract. All fields are `Arc`-backed so a handle can be cheaply cloned into the
/// background task that drives session events.
#[derive(Clone)]
pub struct DebugBackend {
    supervisor: Arc<AdapterSupervisor>,
    tracker: Arc<StateTracker>,
    breakpoints: Arc<Mutex<HashMap<PathBuf, Vec<SourceLocation>>>>,
    stopped_bus: EventBus<StoppedEvent>,
    terminated_bus: EventBus<TerminatedEvent>,
    output_bus: EventBus<OutputEvent>,
    remembered: Arc<Mutex<Option<(PathBuf, DebugConfig)>>>,
    adapters: Arc<HashMap<String, AdapterDescriptor>>,
    init_timeout: Duration,
}

impl DebugBackend {
    pub fn new(adapters: HashMap<String, AdapterDescriptor>) -> Self {
        Self {
            supervisor: Arc::new(AdapterSupervisor::new()),
            tracker: Arc::new(StateTracker::new(DEFAULT_MAX_OUTPUT_LINES)),
            breakpoints: Arc::new(Mutex::new(HashMap::new())),
            stopped_bus: EventBus::default(),
            terminated_bus: EventBus::default(),
            output_bus: EventBus::default(),
            remembered: Arc::new(Mutex::new(None)),
            adapters: Arc::new(adapters),
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    // ---- session lifecycle -------------------------------------------------

    pub async fn start_debugging(&self, working_dir: &Path, cfg: DebugConfig) -> bool {
        if self.supervisor.is_active() {
            self.supervisor.stop().await;
        }
        self.tracker.transition(crate::types::SessionState::Initializing);

        match self.try_start(working_dir, &cfg).await {
            Ok(()) => {
                self.tracker.transition(crate::types::SessionState::Running);
                *self.remembered.lock().unwrap() = Some((working_dir.to_path_buf(), cfg));
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "startDebugging failed");
                self.tracker.transition(crate::types::SessionState::Terminated);
                self.supervisor.stop().await;
                false
            }
        }
    }

    async fn try_start(&self, working_dir: &Path, cfg: &DebugConfig) -> Result<(), DapError> {
        let descriptor = self.adapters.get(&cfg.adapter_type).ok_or_else(|| DapError::NoAdapterConfigured {
            language: cfg.adapter_type.clone(),
            configured: self.adapters.keys().cloned().collect(),
        })?;

        let client = self.supervisor.start(descriptor, Some(working_dir)).await?;
        self.send_initialize(&client).await?;

        // Arm the waiter before issuing launch/attach: some adapters emit
        // `initialized` before the launch response arrives.
        let mut events = client.subscribe_events();

        let launch_args = build_launch_args(cfg, working_dir);
        let launch_client = client.clone();
        let is_launch = cfg.request == RequestKind::Launch;
        tokio::spawn(async move {
            let result = if is_launch { launch_client.launch(launch_args).await } else { launch_client.attach(launch_args).await };
            if let Err(err) = result {
                tracing::warn!(error = %err, "launch/attach request failed");
            }
        });

        wait_for_event(&mut events, "initialized", self.init_timeout)
            .await
            .map_err(|_| DapError::InitializationTimeout { waited: self.init_timeout })?;

        self.reconcile_all(&client).await;
        client
            .set_exception_breakpoints(protocol::SetExceptionBreakpointsArguments::default())
            .await?;
        client.configuration_done().await?;

        let backend = self.clone();
        let event_client = client.clone();
        tokio::spawn(async move { backend.run_event_loop(event_client).await });

        Ok(())
    }

    async fn send_initialize(&self, client: &DapClient) -> Result<(), DapError> {
        client
            .initialize(protocol::InitializeRequestArguments {
                client_id: Some("debugmcp-dap".into()),
                client_name: Some("DebugMCP DAP Backend".into()),
                adapter_id: "debugmcp".into(),
                locale: Some("en-US".into()),
                lines_start_at1: Some(true),
                columns_start_at1: Some(true),
                path_format: Some("path".into()),
                supports_variable_type: Some(true),
            })
            .await?;
        Ok(())
    }

    async fn run_event_loop(self, client: Arc<DapClient>) {
        let mut client_events = client.subscribe_events();
        let mut supervisor_events = self.supervisor.subscribe();
        loop {
            tokio::select! {
                event = client_events.recv() => {
                    match event {
                        Ok(ClientEvent::Dap(event)) => self.handle_dap_event(&client, event).await,
                        Ok(ClientEvent::OrphanResponse(_)) => {}
                        Ok(ClientEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                            // The client can close (EOF on the adapter's stdout) before the
                            // supervisor's own exit watcher gets around to emitting
                            // `AdapterExited` on its separate channel — don't rely on
                            // ordering between the two; terminate the session here too.
                            self.finish_as_terminated(None);
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "DAP client event stream lagged");
                        }
                    }
                }
                event = supervisor_events.recv() => {
                    match event {
                        Ok(SupervisorEvent::AdapterExited { .. }) => {
                            self.finish_as_terminated(None);
                            break;
                        }
                        Ok(SupervisorEvent::AdapterCrashed { .. }) => {}
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Transitions to `terminated` and publishes `TerminatedEvent` exactly once,
    /// however the session end is first observed (an explicit `terminated` DAP event,
    /// the client closing, or the supervisor reporting the adapter exited).
    fn finish_as_terminated(&self, restart: Option<bool>) {
        if matches!(self.tracker.phase(), crate::types::SessionState::Terminated | crate::types::SessionState::Inactive) {
            return;
        }
        self.tracker.transition(crate::types::SessionState::Terminated);
        self.terminated_bus.publish(&TerminatedEvent { restart });
    }

    async fn handle_dap_event(&self, client: &Arc<DapClient>, event: protocol::Event) {
        let body = event.body.unwrap_or(Value::Null);
        match event.event.as_str() {
            "stopped" => self.handle_stopped(client, body).await,
            "terminated" => {
                let restart = body.get("restart").and_then(Value::as_bool);
                self.finish_as_terminated(restart);
            }
            "output" => {
                let category = OutputCategory::parse(body.get("category").and_then(Value::as_str).unwrap_or("stdout"));
                let output = body.get("output").and_then(Value::as_str).unwrap_or_default().to_string();
                self.tracker.push_output(&output, category.clone());
                self.output_bus.publish(&OutputEvent { category, output });
            }
            "continued" => self.tracker.record_continued(),
            _ => {}
        }
    }

    async fn handle_stopped(&self, client: &Arc<DapClient>, body: Value) {
        let reason = body.get("reason").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let thread_id = body.get("threadId").and_then(Value::as_i64);
        let all_threads_stopped = body.get("allThreadsStopped").and_then(Value::as_bool);
        let description = body.get("description").and_then(Value::as_str).map(str::to_string);

        self.tracker.record_stopped(reason.clone(), thread_id);

        if let Some(thread_id) = thread_id.or_else(|| self.tracker.current_thread()) {
            match client
                .stack_trace(protocol::StackTraceArguments { thread_id, start_frame: Some(0), levels: Some(1) })
                .await
            {
                Ok(trace) => {
                    if let Some(frame) = trace.stack_frames.into_iter().next() {
                        let info = FrameInfo {
                            id: frame.id,
                            name: frame.name,
                            line: frame.line,
                            column: if frame.column == 0 { 1 } else { frame.column },
                            source: frame.source.map(|s| FrameSource { path: s.path.map(PathBuf::from), name: s.name }),
                        };
                        self.tracker.set_current_frame(info);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "stackTrace failed after stopped event"),
            }
        }

        self.stopped_bus
            .publish(&StoppedEvent { reason, description, thread_id, all_threads_stopped });
    }

    pub async fn stop_debugging(&self) {
        self.supervisor.stop().await;
        self.tracker.transition(crate::types::SessionState::Inactive);
        *self.remembered.lock().unwrap() = None;
    }

    pub fn has_active_session(&self) -> bool {
        self.supervisor.is_active()
            && !matches!(self.tracker.phase(), crate::types::SessionState::Inactive | crate::types::SessionState::Terminated)
    }

    fn require_client(&self) -> Result<Arc<DapClient>, DapError> {
        self.supervisor.client().ok_or(DapError::NoActiveSession)
    }

    pub async fn ensure_thread_id(&self) -> Result<i64, DapError> {
        if let Some(id) = self.tracker.current_thread() {
            return Ok(id);
        }
        let client = self.require_client()?;
        let body = client.threads().await?;
        let Some(first) = body.threads.first() else {
            return Err(DapError::NoThreadsAvailable);
        };
        let id = first.id;
        let threads = body
            .threads
            .into_iter()
            .map(|t| crate::types::ThreadInfo { id: t.id, name: t.name })
            .collect();
        self.tracker.set_threads(threads);
        self.tracker.set_current_thread(id);
        Ok(id)
    }

    pub async fn step_over(&self) -> Result<(), DapError> {
        let client = self.require_client()?;
        let thread_id = self.ensure_thread_id().await?;
        client.next(thread_id).await?;
        self.tracker.record_continued();
        Ok(())
    }

    pub async fn step_into(&self) -> Result<(), DapError> {
        let client = self.require_client()?;
        let thread_id = self.ensure_thread_id().await?;
        client.step_in(thread_id).await?;
        self.tracker.record_continued();
        Ok(())
    }

    pub async fn step_out(&self) -> Result<(), DapError> {
        let client = self.require_client()?;
        let thread_id = self.ensure_thread_id().await?;
        client.step_out(thread_id).await?;
        self.tracker.record_continued();
        Ok(())
    }

    pub async fn continue_(&self) -> Result<(), DapError> {
        let client = self.require_client()?;
        let thread_id = self.ensure_thread_id().await?;
        client.continue_(thread_id).await?;
        self.tracker.record_continued();
        Ok(())
    }

    pub async fn restart(&self) -> bool {
        let remembered = self.remembered.lock().unwrap().clone();
        let Some((working_dir, cfg)) = remembered else { return false };

        if let Some(client) = self.supervisor.client() {
            let _ = client
                .disconnect(protocol::DisconnectArguments { restart: Some(true), terminate_debuggee: None })
                .await;
        }
        self.start_debugging(&working_dir, cfg).await
    }

    // ---- breakpoints --------------------------------------------------------

    pub async fn add_breakpoint(&self, uri: &Uri, line: i64) {
        let mut added = false;
        {
            let mut map = self.breakpoints.lock().unwrap();
            let list = map.entry(uri.path.clone()).or_default();
            if !list.iter().any(|bp| bp.line == line) {
                list.push(SourceLocation { path: uri.path.clone(), line, column: None, condition: None, hit_condition: None, log_message: None });
                added = true;
            }
        }
        if added && self.has_active_session() {
            self.reconcile_path(&uri.path).await;
        }
    }

    pub async fn remove_breakpoint(&self, uri: &Uri, line: i64) {
        let mut removed = false;
        {
            let mut map = self.breakpoints.lock().unwrap();
            if let Some(list) = map.get_mut(&uri.path) {
                let before = list.len();
                list.retain(|bp| bp.line != line);
                removed = list.len() != before;
                if list.is_empty() {
                    map.remove(&uri.path);
                }
            }
        }
        if removed && self.has_active_session() {
            self.reconcile_path(&uri.path).await;
        }
    }

    pub fn get_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .lock()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .map(Breakpoint::Source)
            .collect()
    }

    pub async fn clear_all_breakpoints(&self) {
        let paths: Vec<PathBuf> = {
            let mut map = self.breakpoints.lock().unwrap();
            let paths = map.keys().cloned().collect();
            map.clear();
            paths
        };
        if self.has_active_session() {
            for path in paths {
                self.reconcile_path(&path).await;
            }
        }
    }

    /// Sends the adapter the complete breakpoint set for `path`. Reconciliation is
    /// total, never a delta: even a path whose list just became empty is reconciled
    /// with an empty `setBreakpoints` rather than skipped, so the adapter cannot keep
    /// stale breakpoints for a source the in-memory map no longer mentions.
    async fn reconcile_path(&self, path: &Path) {
        let Some(client) = self.supervisor.client() else { return };
        self.reconcile_path_with(&client, path).await;
    }

    async fn reconcile_path_with(&self, client: &DapClient, path: &Path) {
        let breakpoints = self.breakpoints.lock().unwrap().get(path).cloned().unwrap_or_default();
        let args = protocol::SetBreakpointsArguments {
            source: protocol::Source { path: Some(path.to_string_lossy().into_owned()), name: None },
            breakpoints: Some(
                breakpoints
                    .iter()
                    .map(|bp| protocol::SourceBreakpoint {
                        line: bp.line,
                        column: bp.column,
                        condition: bp.condition.clone(),
                        hit_condition: bp.hit_condition.clone(),
                        log_message: bp.log_message.clone(),
                    })
                    .collect(),
            ),
            source_modified: None,
        };
        if let Err(err) = client.set_breakpoints(args).await {
            tracing::warn!(error = %err, path = %path.display(), "setBreakpoints failed");
        }
    }

    async fn reconcile_all(&self, client: &DapClient) {
        let paths: Vec<PathBuf> = self.breakpoints.lock().unwrap().keys().cloned().collect();
        for path in paths {
            self.reconcile_path_with(client, &path).await;
        }
    }

    // ---- inspection ----------------------------------------------------------

    pub fn get_active_frame_id(&self) -> Option<i64> {
        self.tracker.current_frame_id()
    }

    pub async fn get_current_debug_state(&self, num_next_lines: usize) -> DebugState {
        if !self.has_active_session() {
            return DebugState::default();
        }

        let thread_id = self.tracker.current_thread();
        let frame = self.tracker.current_frame();
        let mut state = DebugState {
            session_active: true,
            thread_id,
            frame_id: frame.as_ref().map(|f| f.id),
            frame_name: frame.as_ref().map(|f| f.name.clone()),
            ..Default::default()
        };

        let Some(frame) = frame else { return state };
        let Some(source) = frame.source else { return state };
        let Some(path) = source.path else { return state };

        state.file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        state.file_full_path = Some(path.clone());

        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            let lines: Vec<&str> = contents.lines().collect();
            let idx = frame.line.saturating_sub(1).max(0) as usize;
            if let Some(current) = lines.get(idx) {
                state.current_line = Some(frame.line);
                state.current_line_content = Some((*current).to_string());
                state.next_lines = lines.iter().skip(idx + 1).take(num_next_lines).map(|s| s.to_string()).collect();
            }
        }

        state
    }

    pub async fn get_variables(&self, frame_id: i64, scope: VariableScope) -> Result<HashMap<String, ScopeVariables>, DapError> {
        let client = self.require_client()?;
        let scopes = client.scopes(protocol::ScopesArguments { frame_id }).await?;

        let mut out = HashMap::new();
        for s in scopes.scopes {
            if !scope_matches(&s.name, scope) {
                continue;
            }
            let entry = match client
                .variables(protocol::VariablesArguments { variables_reference: s.variables_reference, filter: None, start: None, count: None })
                .await
            {
                Ok(body) => ScopeVariables { variables: body.variables, error: None },
                Err(err) => ScopeVariables { variables: Vec::new(), error: Some(err.to_string()) },
            };
            out.insert(s.name, entry);
        }
        Ok(out)
    }

    pub async fn evaluate_expression(&self, expression: &str, frame_id: Option<i64>) -> Result<EvaluateResult, DapError> {
        let client = self.require_client()?;
        let body = client
            .evaluate(protocol::EvaluateArguments { expression: expression.to_string(), frame_id, context: Some("repl".into()) })
            .await?;
        Ok(EvaluateResult { result: body.result, type_hint: body.type_hint, variables_reference: body.variables_reference })
    }

    pub fn get_recent_output(&self, opts: OutputQuery) -> RecentOutput {
        self.tracker.query_output(opts.since, opts.max_lines)
    }

    // ---- event registration ---------------------------------------------------

    pub fn on_stopped(&self, f: impl Fn(&StoppedEvent) + Send + Sync + 'static) -> Subscription {
        self.stopped_bus.subscribe(f)
    }

    pub fn on_terminated(&self, f: impl Fn(&TerminatedEvent) + Send + Sync + 'static) -> Subscription {
        self.terminated_bus.subscribe(f)
    }

    pub fn on_output(&self, f: impl Fn(&OutputEvent) + Send + Sync + 'static) -> Subscription {
        self.output_bus.subscribe(f)
    }
}

fn scope_matches(name: &str, scope: VariableScope) -> bool {
    match scope {
        VariableScope::All => true,
        VariableScope::Local => name.to_lowercase().contains("local"),
        VariableScope::Global => name.to_lowercase().contains("global"),
    }
}

fn build_launch_args(cfg: &DebugConfig, working_dir: &Path) -> Value {
    let mut map = cfg.extra.clone();
    if let Some(program) = &cfg.program {
        map.insert("program".into(), json!(program));
    }
    if !cfg.args.is_empty() {
        map.insert("args".into(), json!(cfg.args));
    }
    if let Some(cwd) = &cfg.cwd {
        map.insert("cwd".into(), json!(cwd));
    }
    if !cfg.env.is_empty() {
        map.insert("env".into(), json!(cfg.env));
    }
    if let Some(stop_on_entry) = cfg.stop_on_entry {
        map.insert("stopOnEntry".into(), json!(stop_on_entry));
    }
    if cfg.request == RequestKind::Launch {
        map.insert("cwd".into(), json!(working_dir.to_string_lossy()));
    }
    Value::Object(map)
}

async fn wait_for_event(events: &mut broadcast::Receiver<ClientEvent>, name: &str, timeout: Duration) -> Result<(), ()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(());
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(ClientEvent::Dap(event))) if event.event == name => return Ok(()),
            Ok(Ok(ClientEvent::Closed)) => return Err(()),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return Err(()),
            Err(_) => return Err(()),
        }
    }
}
