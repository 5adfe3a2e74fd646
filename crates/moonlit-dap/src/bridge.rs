//! The synchronization bridge between a running script and its debug client.
//!
//! The interpreter thread calls into the bridge through [`Debugger`]; the
//! session thread drives it through the inherent methods of
//! [`DebugBridge`]. A single-slot channel carries continuation commands,
//! and every client binding owns a close channel so that an interpreter
//! blocked in [`Debugger::get_action`] is released the moment the client
//! goes away.
//!
//! Client callbacks run while the bridge lock is held. Implementations
//! must not call back into the bridge; they receive everything they need
//! as arguments.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use moonlit_config::DebuggerConfig;
use regex::Regex;

use crate::action::{ActionKind, DebuggerAction};
use crate::source::{
    name_as_path, RuntimeError, SourceCode, SourceFinder, SourceInfo, SourceRef, SourceRegistry,
    TempSettings,
};
use crate::value::DebugValue;
use crate::watch::{WatchItem, WatchSnapshots, WatchType};

const DEFAULT_ERROR_FILTER: &str = "(?s).*";

static NEXT_BRIDGE_ID: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Services the interpreter offers the debugger.
pub trait DebugService: Send + Sync {
    /// Replace the breakpoints of `source_id` with `lines`; returns the
    /// subset that are valid statement-start lines and are now armed.
    fn reset_breakpoints(&self, source_id: usize, lines: &BTreeSet<i64>) -> BTreeSet<i64>;

    /// Evaluate an expression against the top-level scope.
    fn evaluate(&self, expression: &str) -> Result<DebugValue, String>;
}

/// The callbacks the interpreter makes into its attached debugger.
pub trait Debugger: Send + Sync {
    /// Hand the debugger the interpreter's service object.
    fn set_debug_service(&self, service: Arc<dyn DebugService>);

    /// A chunk of source was loaded.
    fn set_source_code(&self, source: SourceCode);

    /// Execution stopped at `ip`; block until the next command.
    fn get_action(&self, ip: usize, location: Option<SourceRef>) -> DebuggerAction;

    /// Publish a fresh snapshot.
    fn update(&self, watch_type: WatchType, items: Vec<WatchItem>);

    /// A runtime error was raised; returns whether execution should pause.
    fn signal_runtime_exception(&self, error: &RuntimeError) -> bool;

    /// The script finished.
    fn signal_execution_ended(&self);

    /// Whether a pause was requested since the last stop.
    fn is_pause_requested(&self) -> bool;
}

/// The bridge's view of a connected debug client.
pub trait DebuggerClient: Send + Sync {
    /// Execution stopped and is waiting for a command.
    fn send_stop_event(&self);

    /// A snapshot of `watch_type` was replaced.
    fn on_watches_updated(&self, watch_type: WatchType);

    /// A source was registered or re-registered.
    fn on_source_changed(&self, source: &SourceInfo);

    /// The script finished.
    fn on_execution_ended(&self);

    /// A runtime error was raised.
    fn on_exception(&self, error: &RuntimeError);

    /// The host closed this client's binding.
    fn unbind(&self);
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Identifies one client binding on a bridge.
pub type BindingId = u64;

struct Binding {
    id: BindingId,
    client: Arc<dyn DebuggerClient>,
    // Dropping the binding drops the only sender, which disconnects every
    // clone of `closed` held by a waiter.
    _close: Sender<()>,
    closed: Receiver<()>,
}

struct BridgeState {
    binding: Option<Binding>,
    next_binding: BindingId,
    sources: SourceRegistry,
    watches: WatchSnapshots,
    error_filter: Option<Regex>,
    service: Option<Arc<dyn DebugService>>,
}

/// Construction options for a [`DebugBridge`].
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Pattern deciding which runtime errors pause execution; `None`
    /// matches every error.
    pub error_filter: Option<Regex>,
    /// Where in-memory sources are materialized.
    pub temp: TempSettings,
}

impl BridgeOptions {
    /// Options from the `[debugger]` config table. An invalid error filter
    /// falls back to matching everything.
    pub fn from_config(config: &DebuggerConfig) -> Self {
        let error_filter = match Regex::new(&config.error_filter) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %config.error_filter, error = %e, "invalid error filter, matching all errors");
                None
            }
        };
        Self {
            error_filter,
            temp: TempSettings {
                dir: config.temp_dir.clone(),
                extension: config.temp_extension.clone(),
            },
        }
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            error_filter: None,
            temp: TempSettings::default(),
        }
    }
}

/// Cross-thread handshake object attached to one running script.
pub struct DebugBridge {
    id: usize,
    name: String,
    state: Mutex<BridgeState>,
    pause_requested: AtomicBool,
    mailbox_tx: Sender<DebuggerAction>,
    mailbox_rx: Receiver<DebuggerAction>,
}

impl DebugBridge {
    /// Create a bridge for the script called `name`.
    pub fn new(name: impl Into<String>, finder: Option<SourceFinder>, options: BridgeOptions) -> Self {
        let (mailbox_tx, mailbox_rx) = bounded(1);
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::SeqCst);
        let name = name.into();
        tracing::debug!(bridge = id, name = %name, "created debug bridge");
        Self {
            id,
            name,
            state: Mutex::new(BridgeState {
                binding: None,
                next_binding: 1,
                sources: SourceRegistry::new(finder.unwrap_or_else(name_as_path), options.temp),
                watches: WatchSnapshots::default(),
                error_filter: options.error_filter,
                service: None,
            }),
            pause_requested: AtomicBool::new(false),
            mailbox_tx,
            mailbox_rx,
        }
    }

    /// Process-unique id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Script name shown in `!list`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_mailbox(&self) {
        while self.mailbox_rx.try_recv().is_ok() {}
    }

    /// Bind `client`, replacing any current client.
    ///
    /// The outgoing client is told it was unbound, then the incoming one is
    /// replayed every registered source in registration order, all inside
    /// one critical section.
    pub fn bind(&self, client: Arc<dyn DebuggerClient>) -> BindingId {
        let mut state = self.lock();
        if let Some(old) = state.binding.take() {
            tracing::info!(bridge = self.id, binding = old.id, "replacing bound client");
            old.client.unbind();
        }
        self.drain_mailbox();
        for info in state.sources.infos() {
            client.on_source_changed(&info);
        }

        let id = state.next_binding;
        state.next_binding += 1;
        let (close, closed) = bounded(0);
        state.binding = Some(Binding {
            id,
            client,
            _close: close,
            closed,
        });
        tracing::info!(bridge = self.id, binding = id, "client bound");
        id
    }

    /// Release `binding` without notifying its client (the client left on
    /// its own). A stale id is ignored.
    pub fn detach_client(&self, binding: BindingId) {
        let mut state = self.lock();
        if state.binding.as_ref().is_some_and(|b| b.id == binding) {
            state.binding = None;
            self.drain_mailbox();
            tracing::info!(bridge = self.id, binding, "client detached");
        }
    }

    /// Close the current binding on the host's behalf; the client is told
    /// the session was closed.
    pub fn close_client(&self) {
        let mut state = self.lock();
        if let Some(old) = state.binding.take() {
            old.client.unbind();
            self.drain_mailbox();
            tracing::info!(bridge = self.id, binding = old.id, "client closed by host");
        }
    }

    /// The current binding, if a client is attached.
    pub fn current_binding(&self) -> Option<BindingId> {
        self.lock().binding.as_ref().map(|b| b.id)
    }

    /// Queue `action` for the interpreter.
    ///
    /// Blocks while a previous action is still unconsumed. Returns `false`
    /// (dropping the action) when no client is bound or the binding closes
    /// while waiting.
    pub fn submit_action(&self, action: DebuggerAction) -> bool {
        let closed = match self.lock().binding.as_ref() {
            Some(b) => b.closed.clone(),
            None => {
                tracing::debug!(bridge = self.id, %action, "no client bound, dropping action");
                return false;
            }
        };
        tracing::debug!(bridge = self.id, %action, "submitting action");
        select! {
            send(self.mailbox_tx, action) -> sent => sent.is_ok(),
            recv(closed) -> _ => false,
        }
    }

    /// Ask the interpreter to stop at its next pause check.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Evaluate `expression` through the interpreter's service. A failure
    /// is reported as a string value holding the message.
    pub fn evaluate(&self, expression: &str) -> DebugValue {
        let service = self.lock().service.clone();
        match service {
            Some(service) => service
                .evaluate(expression)
                .unwrap_or_else(DebugValue::String),
            None => DebugValue::String("no debug service available".to_string()),
        }
    }

    /// Replace the breakpoints of `source_id`; returns the applied lines.
    pub fn reset_breakpoints(&self, source_id: usize, lines: &BTreeSet<i64>) -> BTreeSet<i64> {
        let service = self.lock().service.clone();
        match service {
            Some(service) => service.reset_breakpoints(source_id, lines),
            None => BTreeSet::new(),
        }
    }

    /// Latest snapshot for `watch_type`.
    pub fn watches(&self, watch_type: WatchType) -> Arc<Vec<WatchItem>> {
        self.lock().watches.get(watch_type)
    }

    /// The source registered under `id`.
    pub fn source(&self, id: usize) -> Option<SourceCode> {
        self.lock().sources.get(id).cloned()
    }

    /// The path clients should open for `id`.
    pub fn source_file(&self, id: usize) -> Option<String> {
        self.lock().sources.file(id)
    }

    /// Find a registered source by (debugger-native) path.
    pub fn find_source_by_path(&self, path: &str) -> Option<usize> {
        self.lock().sources.find_by_path(path)
    }

    /// Current error filter pattern.
    pub fn error_filter(&self) -> String {
        self.lock()
            .error_filter
            .as_ref()
            .map_or(DEFAULT_ERROR_FILTER, Regex::as_str)
            .to_string()
    }

    /// Replace the error filter.
    pub fn set_error_filter(&self, filter: Regex) {
        self.lock().error_filter = Some(filter);
    }
}

impl Debugger for DebugBridge {
    fn set_debug_service(&self, service: Arc<dyn DebugService>) {
        self.lock().service = Some(service);
    }

    fn set_source_code(&self, source: SourceCode) {
        let mut state = self.lock();
        let info = state.sources.register(source);
        if let Some(b) = &state.binding {
            b.client.on_source_changed(&info);
        }
    }

    fn get_action(&self, ip: usize, location: Option<SourceRef>) -> DebuggerAction {
        self.pause_requested.store(false, Ordering::SeqCst);

        let mut waiting_on = None;
        loop {
            // A closed binding only releases the interpreter when no other
            // client took its place; a replacement is told about the stop.
            let closed = {
                let state = self.lock();
                match &state.binding {
                    Some(b) if waiting_on == Some(b.id) => b.closed.clone(),
                    Some(b) => {
                        if waiting_on.is_some() {
                            tracing::debug!(bridge = self.id, binding = b.id, "client replaced while waiting");
                        }
                        b.client.send_stop_event();
                        waiting_on = Some(b.id);
                        b.closed.clone()
                    }
                    None => {
                        if waiting_on.is_some() {
                            tracing::debug!(bridge = self.id, "client unbound while waiting, resuming");
                        }
                        return DebuggerAction::new(ActionKind::Run);
                    }
                }
            };
            tracing::debug!(bridge = self.id, ip, ?location, "waiting for action");

            select! {
                recv(self.mailbox_rx) -> action => return action.unwrap_or_default(),
                recv(closed) -> _ => {}
            }
        }
    }

    fn update(&self, watch_type: WatchType, items: Vec<WatchItem>) {
        let mut state = self.lock();
        state.watches.replace(watch_type, items);
        if let Some(b) = &state.binding {
            b.client.on_watches_updated(watch_type);
        }
    }

    fn signal_runtime_exception(&self, error: &RuntimeError) -> bool {
        let state = self.lock();
        let Some(b) = &state.binding else {
            return false;
        };
        b.client.on_exception(error);
        let pause = state
            .error_filter
            .as_ref()
            .map_or(true, |re| re.is_match(&error.message));
        self.pause_requested.store(pause, Ordering::SeqCst);
        pause
    }

    fn signal_execution_ended(&self) {
        let state = self.lock();
        if let Some(b) = &state.binding {
            b.client.on_execution_ended();
        }
    }

    fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for DebugBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugBridge")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
