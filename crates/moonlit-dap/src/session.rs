//! DAP session: lifecycle state machine, coordinate conventions, and the
//! request router.
//!
//! The router owns `initialize` (convention negotiation and capabilities)
//! and turns every handler result into exactly one response. Handlers
//! never see transport details; they get a [`SessionContext`] to send
//! events through.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::capabilities::AdapterCapabilities;
use crate::error::DapError;
use crate::protocol::{
    ErrorMessage, Event, InitializeArguments, OutputEventBody, ProtocolMessage, Request, Response,
};
use crate::transport::{run_read_loop, MessageSink};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// The current state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted, no `initialize` yet.
    Uninitialized,
    /// The `initialize` handshake has completed.
    Initialized,
    /// The script is running.
    Running,
    /// The script is stopped and waiting for a command.
    Stopped,
    /// The client disconnected; terminal.
    Disconnected,
}

/// Lifecycle state of a single debug connection.
#[derive(Debug)]
pub struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    /// Create a lifecycle in the [`Uninitialized`](SessionState::Uninitialized) state.
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    /// Return the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transition: Uninitialized → Initialized.
    pub fn initialize(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        if self.state != SessionState::Uninitialized {
            return Err(DapError::InvalidState(format!(
                "cannot initialize: session is in {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Transition: Initialized → Running (via launch or attach).
    pub fn start(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        if self.state != SessionState::Initialized {
            return Err(DapError::InvalidState(format!(
                "cannot start: session is in {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Transition: Initialized | Running | Stopped → Stopped.
    ///
    /// A script may stop before the client sends launch or attach.
    pub fn stopped(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        if self.state == SessionState::Uninitialized {
            return Err(DapError::InvalidState(
                "cannot stop: session is not initialized".into(),
            ));
        }
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Transition: Stopped → Running.
    pub fn resumed(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        if self.state != SessionState::Stopped {
            return Err(DapError::InvalidState(format!(
                "cannot resume: session is in {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Transition: any → Disconnected.
    pub fn disconnect(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        self.state = SessionState::Disconnected;
        Ok(())
    }

    fn require_not_terminated(&self) -> Result<(), DapError> {
        if self.state == SessionState::Disconnected {
            return Err(DapError::Terminated);
        }
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Coordinate conventions
// ---------------------------------------------------------------------------

/// Line-numbering and path conventions of both sides of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    /// Debugger lines are 1-based.
    pub debugger_lines_start_at1: bool,
    /// Debugger paths are URIs.
    pub debugger_paths_are_uri: bool,
    /// Client lines are 1-based.
    pub client_lines_start_at1: bool,
    /// Client paths are URIs.
    pub client_paths_are_uri: bool,
}

impl Coordinates {
    /// Debugger conventions as given; client defaults to 1-based lines
    /// and URI paths until `initialize` says otherwise.
    pub fn new(debugger_lines_start_at1: bool, debugger_paths_are_uri: bool) -> Self {
        Self {
            debugger_lines_start_at1,
            debugger_paths_are_uri,
            client_lines_start_at1: true,
            client_paths_are_uri: true,
        }
    }

    /// Convert a debugger line to a client line.
    pub fn line_to_client(&self, line: i64) -> i64 {
        match (self.debugger_lines_start_at1, self.client_lines_start_at1) {
            (true, false) => line - 1,
            (false, true) => line + 1,
            _ => line,
        }
    }

    /// Convert a client line to a debugger line.
    pub fn line_to_debugger(&self, line: i64) -> i64 {
        match (self.debugger_lines_start_at1, self.client_lines_start_at1) {
            (true, false) => line + 1,
            (false, true) => line - 1,
            _ => line,
        }
    }

    /// Convert a debugger path to the client's representation.
    pub fn path_to_client(&self, path: &str) -> Option<String> {
        convert_path(path, self.debugger_paths_are_uri, self.client_paths_are_uri)
    }

    /// Convert a client path to the debugger's representation. A malformed
    /// URI yields `None`.
    pub fn path_to_debugger(&self, path: &str) -> Option<String> {
        convert_path(path, self.client_paths_are_uri, self.debugger_paths_are_uri)
    }
}

fn convert_path(path: &str, from_uri: bool, to_uri: bool) -> Option<String> {
    match (from_uri, to_uri) {
        (true, false) => uri_to_path(path),
        (false, true) => match Url::from_file_path(path) {
            Ok(url) => Some(url.to_string()),
            Err(()) => {
                tracing::warn!(path, "cannot express path as a file URI");
                None
            }
        },
        _ => Some(path.to_string()),
    }
}

fn uri_to_path(uri: &str) -> Option<String> {
    let parsed = match Url::parse(uri) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(uri, error = %e, "path not well formed");
            return None;
        }
    };
    if parsed.scheme() != "file" {
        tracing::warn!(uri, "not a file URI");
        return None;
    }
    match parsed.to_file_path() {
        Ok(p) => Some(p.to_string_lossy().into_owned()),
        Err(()) => {
            tracing::warn!(uri, "file URI has no local path");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Commands and handlers
// ---------------------------------------------------------------------------

/// Every request command the router recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Initialize,
    Launch,
    Attach,
    Disconnect,
    Next,
    Continue,
    StepIn,
    StepOut,
    Pause,
    StackTrace,
    Scopes,
    Variables,
    Source,
    Threads,
    SetBreakpoints,
    SetFunctionBreakpoints,
    SetExceptionBreakpoints,
    Evaluate,
}

impl Command {
    /// Look up a wire command name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialize" => Command::Initialize,
            "launch" => Command::Launch,
            "attach" => Command::Attach,
            "disconnect" => Command::Disconnect,
            "next" => Command::Next,
            "continue" => Command::Continue,
            "stepIn" => Command::StepIn,
            "stepOut" => Command::StepOut,
            "pause" => Command::Pause,
            "stackTrace" => Command::StackTrace,
            "scopes" => Command::Scopes,
            "variables" => Command::Variables,
            "source" => Command::Source,
            "threads" => Command::Threads,
            "setBreakpoints" => Command::SetBreakpoints,
            "setFunctionBreakpoints" => Command::SetFunctionBreakpoints,
            "setExceptionBreakpoints" => Command::SetExceptionBreakpoints,
            "evaluate" => Command::Evaluate,
            _ => return None,
        })
    }

    /// The wire command name.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::Launch => "launch",
            Command::Attach => "attach",
            Command::Disconnect => "disconnect",
            Command::Next => "next",
            Command::Continue => "continue",
            Command::StepIn => "stepIn",
            Command::StepOut => "stepOut",
            Command::Pause => "pause",
            Command::StackTrace => "stackTrace",
            Command::Scopes => "scopes",
            Command::Variables => "variables",
            Command::Source => "source",
            Command::Threads => "threads",
            Command::SetBreakpoints => "setBreakpoints",
            Command::SetFunctionBreakpoints => "setFunctionBreakpoints",
            Command::SetExceptionBreakpoints => "setExceptionBreakpoints",
            Command::Evaluate => "evaluate",
        }
    }
}

/// What a handler produces for one request: an optional body, or a
/// numbered error.
pub type HandlerResult = Result<Option<Value>, ErrorMessage>;

/// Deserialize request arguments; `null` yields the default value and a
/// shape mismatch becomes error 1104.
pub fn parse_args<T>(command: Command, args: &Value) -> Result<T, ErrorMessage>
where
    T: DeserializeOwned + Default,
{
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args.clone())
        .map_err(|e| ErrorMessage::request_failed(command.as_str(), e.to_string()))
}

/// Shared handle for sending messages from any thread on one connection.
#[derive(Debug, Clone)]
pub struct SessionContext {
    sink: Arc<MessageSink>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    coords: Coordinates,
}

impl SessionContext {
    /// Send an event.
    pub fn send_event(&self, event: Event) {
        self.sink.send(ProtocolMessage::Event(event));
    }

    /// Print one line on the client's debug console.
    pub fn send_text(&self, text: &str) {
        let body = OutputEventBody {
            category: "console".to_string(),
            output: format!("{text}\n"),
        };
        self.send_event(Event::new("output", Some(body)));
    }

    /// Negotiated coordinate conventions. Fixed once `initialize` succeeded.
    pub fn coords(&self) -> &Coordinates {
        &self.coords
    }

    /// Apply a lifecycle transition, logging a rejected one.
    pub fn transition<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&mut Lifecycle) -> Result<(), DapError>,
    {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = f(&mut lifecycle) {
            tracing::debug!(transition = what, error = %e, "lifecycle transition ignored");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }
}

/// Per-command behavior plugged into a [`Session`].
pub trait RequestHandler {
    /// Called during `initialize`, before the response is sent.
    fn greet(&mut self, _ctx: &SessionContext) {}

    /// Called after the `initialized` event was sent.
    fn configured(&mut self, _ctx: &SessionContext) {}

    /// Handle any command other than `initialize`.
    fn handle(&mut self, ctx: &SessionContext, command: Command, args: &Value) -> HandlerResult;

    /// Called after the response to `command` was sent.
    fn responded(&mut self, _ctx: &SessionContext, _command: Command) {}

    /// Called once when the connection ends, however it ends.
    fn closed(&mut self, _ctx: &SessionContext) {}
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// One debug connection: routes requests to a [`RequestHandler`].
pub struct Session<H> {
    handler: H,
    ctx: SessionContext,
    stop: Arc<AtomicBool>,
}

impl<H: RequestHandler> Session<H> {
    /// Create a session writing to `output`, with the debugger's own
    /// line and path conventions.
    pub fn new(
        handler: H,
        output: Box<dyn Write + Send>,
        debugger_lines_start_at1: bool,
        debugger_paths_are_uri: bool,
    ) -> Self {
        Self {
            handler,
            ctx: SessionContext {
                sink: Arc::new(MessageSink::new(output)),
                lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
                coords: Coordinates::new(debugger_lines_start_at1, debugger_paths_are_uri),
            },
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The session's message context.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// The handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Flag that ends [`run`](Self::run) after the current read.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Serve requests from `input` until the peer closes, `disconnect`
    /// is handled, or the stop flag is set.
    pub fn run<R: Read>(&mut self, input: R) -> Result<(), DapError> {
        let stop = Arc::clone(&self.stop);
        let result = run_read_loop(input, &stop, |request| self.dispatch(request));
        self.handler.closed(&self.ctx);
        self.ctx.transition("close", Lifecycle::disconnect);
        result
    }

    /// Handle one request and send exactly one response.
    pub fn dispatch(&mut self, request: Request) {
        let Some(command) = Command::parse(&request.command) else {
            tracing::warn!(command = %request.command, seq = request.seq, "unrecognized request");
            let err = ErrorMessage::unrecognized_request(&request.command);
            self.respond(Response::error(&request, &err));
            return;
        };
        tracing::debug!(command = %request.command, seq = request.seq, "dispatching request");

        let result = match command {
            Command::Initialize => self.initialize(&request.arguments),
            _ => self.handler.handle(&self.ctx, command, &request.arguments),
        };

        let succeeded = result.is_ok();
        match result {
            Ok(body) => self.respond(Response::success(&request, body)),
            Err(err) => {
                tracing::debug!(command = %request.command, code = err.id, "request failed");
                self.respond(Response::error(&request, &err));
            }
        }
        self.handler.responded(&self.ctx, command);

        if command == Command::Initialize && succeeded {
            self.ctx.send_event(Event::new::<Value>("initialized", None));
            self.handler.configured(&self.ctx);
        }
        if command == Command::Disconnect {
            self.ctx.transition("disconnect", Lifecycle::disconnect);
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn respond(&self, response: Response) {
        self.ctx.sink.send(ProtocolMessage::Response(response));
    }

    fn initialize(&mut self, args: &Value) -> HandlerResult {
        let args: InitializeArguments = parse_args(Command::Initialize, args)?;

        let mut coords = self.ctx.coords;
        if let Some(at1) = args.lines_start_at1 {
            coords.client_lines_start_at1 = at1;
        }
        match args.path_format.as_deref() {
            None | Some("uri") => coords.client_paths_are_uri = true,
            Some("path") => coords.client_paths_are_uri = false,
            Some(other) => return Err(ErrorMessage::bad_path_format(other)),
        }

        self.ctx
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialize()
            .map_err(|e| ErrorMessage::request_failed(Command::Initialize.as_str(), e.to_string()))?;
        self.ctx.coords = coords;
        tracing::info!(client = ?args.client_id, ?coords, "session initialized");

        self.handler.greet(&self.ctx);
        Ok(Some(AdapterCapabilities::fixed().to_body()))
    }
}
