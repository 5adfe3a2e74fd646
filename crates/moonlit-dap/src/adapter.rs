//! The concrete adapter: translates DAP requests into [`DebugBridge`]
//! operations and bridge notifications into DAP events.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use crate::action::{ActionKind, DebuggerAction};
use crate::bridge::{BindingId, DebugBridge, DebuggerClient};
use crate::protocol::{
    Breakpoint, ErrorMessage, EvaluateArguments, EvaluateResponseBody, Event, Scope,
    SetBreakpointsArguments, SourceArguments, StackFrame, StackTraceArguments, StoppedEventBody,
    Source, Thread, ThreadEventBody, Variable, VariablesArguments,
};
use crate::repl::{error_lines, Repl, ReplCommand, ScriptDirectory, META_PREFIX};
use crate::session::{parse_args, Command, HandlerResult, Lifecycle, RequestHandler, SessionContext};
use crate::source::{RuntimeError, SourceInfo};
use crate::value::DebugValue;
use crate::watch::{WatchItem, WatchType};

/// `variablesReference` of the Locals scope.
pub const SCOPE_LOCALS: i64 = 65536;
/// `variablesReference` of the Self scope.
pub const SCOPE_SELF: i64 = 65537;

const DEFAULT_STACK_LEVELS: i64 = 10;
/// Room kept in a stack trace for the synthetic trailing frames.
const MARKER_FRAMES: i64 = 3;

const MAIN_THREAD_ID: i64 = 0;

type ValueCache = Arc<Mutex<Vec<DebugValue>>>;

fn lock_cache(cache: &ValueCache) -> MutexGuard<'_, Vec<DebugValue>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn main_thread_body() -> Value {
    json!({ "threads": [Thread { id: MAIN_THREAD_ID, name: "Main Thread".into() }] })
}

/// A debug session bound to one script's bridge.
pub struct ScriptDebugSession {
    bridge: Arc<DebugBridge>,
    directory: Option<Arc<dyn ScriptDirectory>>,
    notify_execution_end: Arc<AtomicBool>,
    variables: ValueCache,
    binding: Option<BindingId>,
    pause_pending: bool,
    close_pending: bool,
}

impl ScriptDebugSession {
    /// Create a session for `bridge`. `directory` backs the `!list`,
    /// `!select` and `!switch` commands.
    pub fn new(
        bridge: Arc<DebugBridge>,
        directory: Option<Arc<dyn ScriptDirectory>>,
        notify_execution_end: bool,
    ) -> Self {
        Self {
            bridge,
            directory,
            notify_execution_end: Arc::new(AtomicBool::new(notify_execution_end)),
            variables: Arc::new(Mutex::new(Vec::new())),
            binding: None,
            pause_pending: false,
            close_pending: false,
        }
    }

    /// The bridge this session drives.
    pub fn bridge(&self) -> &Arc<DebugBridge> {
        &self.bridge
    }

    fn step(&self, ctx: &SessionContext, kind: ActionKind) -> HandlerResult {
        ctx.transition("resume", Lifecycle::resumed);
        if !self.bridge.submit_action(DebuggerAction::new(kind)) {
            tracing::debug!(bridge = self.bridge.id(), ?kind, "action not delivered");
        }
        Ok(None)
    }

    fn stack_trace(&self, ctx: &SessionContext, args: &Value) -> HandlerResult {
        let args: StackTraceArguments = parse_args(Command::StackTrace, args)?;
        let levels = args
            .levels
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_STACK_LEVELS);

        let stack = self.bridge.watches(WatchType::CallStack);
        let threads = self.bridge.watches(WatchType::Threads);
        let max = usize::try_from(levels - MARKER_FRAMES)
            .unwrap_or(0)
            .min(stack.len());

        let mut frames: Vec<StackFrame> = stack
            .iter()
            .take(max)
            .enumerate()
            .map(|(i, item)| self.frame(ctx, i as i64, item))
            .collect();

        let mut next_id = frames.len() as i64;
        let mut marker = |name: String| {
            frames.push(StackFrame::marker(next_id, name));
            next_id += 1;
        };
        if stack.len() > max {
            marker("(...)".into());
        }
        marker(match threads.last() {
            Some(coroutine) => format!("({})", coroutine.name),
            None => "(main coroutine)".into(),
        });
        marker("(native)".into());

        let total = frames.len();
        Ok(Some(json!({ "stackFrames": frames, "totalFrames": total })))
    }

    fn frame(&self, ctx: &SessionContext, id: i64, item: &WatchItem) -> StackFrame {
        let Some(loc) = &item.location else {
            return StackFrame::marker(id, item.name.clone());
        };
        let coords = ctx.coords();
        let path = if loc.is_native {
            "(native)".to_string()
        } else {
            match self.bridge.source_file(loc.source_id) {
                Some(file) => coords.path_to_client(&file).unwrap_or(file),
                None => "???".to_string(),
            }
        };
        let name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        StackFrame {
            id,
            name: item.name.clone(),
            source: Some(Source {
                name,
                path: Some(path),
            }),
            line: coords.line_to_client(loc.from_line),
            column: loc.from_char,
            end_line: Some(coords.line_to_client(loc.to_line)),
            end_column: Some(loc.to_char),
        }
    }

    fn variables(&self, args: &Value) -> HandlerResult {
        let args: VariablesArguments = parse_args(Command::Variables, args)?;
        let rows = match args.variables_reference {
            SCOPE_SELF => self.bridge.evaluate("self").inspect(),
            SCOPE_LOCALS => self
                .bridge
                .watches(WatchType::Locals)
                .iter()
                .map(|w| {
                    let value = w.value.as_ref().unwrap_or(&DebugValue::Void);
                    Variable::leaf(w.name.clone(), value.to_debug_print_string())
                })
                .collect(),
            reference => {
                let cached = usize::try_from(reference - 1)
                    .ok()
                    .and_then(|i| lock_cache(&self.variables).get(i).cloned());
                match cached {
                    Some(value) => value.inspect(),
                    None => vec![Variable::leaf("<error>", "")],
                }
            }
        };
        Ok(Some(json!({ "variables": rows })))
    }

    fn source(&self, ctx: &SessionContext, args: &Value) -> HandlerResult {
        let args: SourceArguments = parse_args(Command::Source, args)?;
        let requested = args.source.and_then(|s| s.path).unwrap_or_default();
        let content = ctx
            .coords()
            .path_to_debugger(&requested)
            .and_then(|p| self.bridge.find_source_by_path(&p))
            .and_then(|id| self.bridge.source(id));
        match content {
            Some(src) => Ok(Some(json!({ "content": src.code }))),
            None => Err(ErrorMessage::source_not_found(&requested)),
        }
    }

    fn set_breakpoints(&self, ctx: &SessionContext, args: &Value) -> HandlerResult {
        let args: SetBreakpointsArguments = parse_args(Command::SetBreakpoints, args)?;
        let path = args
            .source
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(ErrorMessage::malformed_breakpoint_source)?;

        let coords = ctx.coords();
        let Some(source_id) = coords
            .path_to_debugger(path)
            .and_then(|p| self.bridge.find_source_by_path(&p))
        else {
            tracing::debug!(path, "breakpoints requested for unknown source");
            return Ok(Some(json!({ "breakpoints": [] })));
        };

        let mut requested: Vec<i64> = Vec::new();
        for line in args.requested_lines() {
            if !requested.contains(&line) {
                requested.push(line);
            }
        }
        let wanted: BTreeSet<i64> = requested.iter().map(|l| coords.line_to_debugger(*l)).collect();
        let applied = self.bridge.reset_breakpoints(source_id, &wanted);
        tracing::debug!(source_id, ?wanted, ?applied, "breakpoints reset");

        let breakpoints: Vec<Breakpoint> = requested
            .iter()
            .map(|line| Breakpoint {
                verified: applied.contains(&coords.line_to_debugger(*line)),
                line: *line,
            })
            .collect();
        Ok(Some(json!({ "breakpoints": breakpoints })))
    }

    fn evaluate(&mut self, ctx: &SessionContext, args: &Value) -> HandlerResult {
        let args: EvaluateArguments = parse_args(Command::Evaluate, args)?;
        let context = args.context.as_deref().unwrap_or("hover");

        if args.frame_id.unwrap_or(0) != 0 && context != "repl" {
            ctx.send_text(
                "Warning : Evaluation of variables/watches is always done with the top-level scope.",
            );
        }

        if context == "repl" && args.expression.starts_with(META_PREFIX) {
            self.run_repl(ctx, &args.expression);
            let body = EvaluateResponseBody {
                result: String::new(),
                result_type: None,
                variables_reference: 0,
            };
            return Ok(Some(json!(body)));
        }

        let value = self.bridge.evaluate(&args.expression);
        let reference = if value.is_expandable() {
            let mut cache = lock_cache(&self.variables);
            cache.push(value.clone());
            cache.len() as i64
        } else {
            0
        };
        let body = EvaluateResponseBody {
            result: value.to_debug_print_string(),
            result_type: Some(value.type_name().to_string()),
            variables_reference: reference,
        };
        Ok(Some(json!(body)))
    }

    fn run_repl(&mut self, ctx: &SessionContext, line: &str) {
        let lines = match ReplCommand::parse(line) {
            Ok(command) => {
                let repl = Repl {
                    bridge: &self.bridge,
                    directory: self.directory.as_deref(),
                    notify_execution_end: &self.notify_execution_end,
                };
                let outcome = repl.execute(command);
                self.close_pending |= outcome.close_session;
                outcome.lines
            }
            Err(e) => error_lines(&e),
        };
        for line in lines {
            ctx.send_text(&line);
        }
    }
}

impl RequestHandler for ScriptDebugSession {
    fn greet(&mut self, ctx: &SessionContext) {
        ctx.send_text(&format!(
            "Connected to moonlit {} on process {}",
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        ));
        ctx.send_text(&format!(
            "Debugging script '{}'; use the debug console to debug another script.",
            self.bridge.name()
        ));
        ctx.send_text("Type '!help' in the Debug Console for available Commands.");
    }

    fn configured(&mut self, ctx: &SessionContext) {
        let client = SessionClient {
            ctx: ctx.clone(),
            variables: Arc::clone(&self.variables),
            notify_execution_end: Arc::clone(&self.notify_execution_end),
        };
        self.binding = Some(self.bridge.bind(Arc::new(client)));
    }

    fn handle(&mut self, ctx: &SessionContext, command: Command, args: &Value) -> HandlerResult {
        match command {
            Command::Launch | Command::Attach => {
                ctx.transition("start", Lifecycle::start);
                let started = ThreadEventBody {
                    reason: "started".into(),
                    thread_id: MAIN_THREAD_ID,
                };
                ctx.send_event(Event::new("thread", Some(started)));
                Ok(None)
            }
            Command::Disconnect => {
                if let Some(binding) = self.binding.take() {
                    self.bridge.detach_client(binding);
                }
                Ok(None)
            }
            Command::Continue => self.step(ctx, ActionKind::Run),
            Command::Next => self.step(ctx, ActionKind::StepOver),
            Command::StepIn => self.step(ctx, ActionKind::StepIn),
            Command::StepOut => self.step(ctx, ActionKind::StepOut),
            Command::Pause => {
                self.bridge.request_pause();
                self.pause_pending = true;
                Ok(None)
            }
            Command::StackTrace => self.stack_trace(ctx, args),
            Command::Scopes => {
                let scopes = [
                    Scope {
                        name: "Locals".into(),
                        variables_reference: SCOPE_LOCALS,
                        expensive: false,
                    },
                    Scope {
                        name: "Self".into(),
                        variables_reference: SCOPE_SELF,
                        expensive: false,
                    },
                ];
                Ok(Some(json!({ "scopes": scopes })))
            }
            Command::Variables => self.variables(args),
            Command::Source => self.source(ctx, args),
            Command::Threads => Ok(Some(main_thread_body())),
            Command::SetBreakpoints => self.set_breakpoints(ctx, args),
            Command::SetFunctionBreakpoints => Ok(Some(json!({ "breakpoints": [] }))),
            Command::SetExceptionBreakpoints => Ok(None),
            Command::Evaluate => self.evaluate(ctx, args),
            Command::Initialize => Ok(None),
        }
    }

    fn responded(&mut self, ctx: &SessionContext, command: Command) {
        if command == Command::Pause && std::mem::take(&mut self.pause_pending) {
            ctx.send_text("Pause pending -- will pause at first script statement.");
        }
        if command == Command::Evaluate && std::mem::take(&mut self.close_pending) {
            self.binding = None;
            self.bridge.close_client();
        }
    }

    fn closed(&mut self, _ctx: &SessionContext) {
        if let Some(binding) = self.binding.take() {
            self.bridge.detach_client(binding);
        }
    }
}

/// Receives bridge notifications on the interpreter thread and turns
/// them into events.
struct SessionClient {
    ctx: SessionContext,
    variables: ValueCache,
    notify_execution_end: Arc<AtomicBool>,
}

impl DebuggerClient for SessionClient {
    fn send_stop_event(&self) {
        self.ctx.transition("stopped", Lifecycle::stopped);
        let body = StoppedEventBody {
            reason: "step".into(),
            thread_id: MAIN_THREAD_ID,
            text: None,
        };
        self.ctx.send_event(Event::new("stopped", Some(body)));
    }

    fn on_watches_updated(&self, watch_type: WatchType) {
        if watch_type == WatchType::CallStack {
            lock_cache(&self.variables).clear();
        }
    }

    fn on_source_changed(&self, source: &SourceInfo) {
        if source.is_override {
            self.ctx
                .send_text(&format!("Loaded source '{}' -> '{}'", source.name, source.path));
        } else {
            self.ctx.send_text(&format!("Loaded source '{}'", source.name));
        }
    }

    fn on_execution_ended(&self) {
        if self.notify_execution_end.load(Ordering::SeqCst) {
            self.ctx.send_text("Execution ended.");
        }
    }

    fn on_exception(&self, error: &RuntimeError) {
        self.ctx
            .send_text(&format!("runtime error : {}", error.display_message()));
    }

    fn unbind(&self) {
        self.ctx
            .send_text("Debug session has been closed by the hosting process.");
        self.ctx.send_text("Bye.");
        self.ctx.send_event(Event::new::<Value>("terminated", None));
    }
}
