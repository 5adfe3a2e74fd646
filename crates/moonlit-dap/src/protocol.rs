//! DAP protocol message types.
//!
//! The envelope is a tagged enum over the three message kinds; every kind
//! carries the `seq` assigned by [`MessageSink`](crate::transport::MessageSink)
//! at send time. Argument and body structs cover the commands the adapter
//! answers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Base protocol messages
// ---------------------------------------------------------------------------

/// A DAP message, discriminated on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    /// Client → adapter.
    Request(Request),
    /// Adapter → client, answering exactly one request.
    Response(Response),
    /// Adapter → client, outside the request/response cycle.
    Event(Event),
}

impl ProtocolMessage {
    /// Sequence number of this message.
    pub fn seq(&self) -> i64 {
        match self {
            ProtocolMessage::Request(r) => r.seq,
            ProtocolMessage::Response(r) => r.seq,
            ProtocolMessage::Event(e) => e.seq,
        }
    }

    pub(crate) fn set_seq(&mut self, seq: i64) {
        match self {
            ProtocolMessage::Request(r) => r.seq = seq,
            ProtocolMessage::Response(r) => r.seq = seq,
            ProtocolMessage::Event(e) => e.seq = seq,
        }
    }
}

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number.
    pub seq: i64,
    /// The command to execute.
    pub command: String,
    /// Command arguments; `null` when absent.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number.
    pub seq: i64,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Whether the request was successful.
    pub success: bool,
    /// The command this response is for.
    pub command: String,
    /// Error message if `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body (command-specific).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// A successful response to `request`.
    pub fn success(request: &Request, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    /// A failed response to `request` carrying a numbered error.
    pub fn error(request: &Request, error: &ErrorMessage) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(error.expand()),
            body: Some(serde_json::json!({ "error": error })),
        }
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number.
    pub seq: i64,
    /// The event type.
    pub event: String,
    /// Event body (event-specific).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    /// Build an event with an optional serializable body.
    pub fn new<T: Serialize>(event: &str, body: Option<T>) -> Self {
        Self {
            seq: 0,
            event: event.to_string(),
            body: body.and_then(|b| serde_json::to_value(b).ok()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error responses
// ---------------------------------------------------------------------------

/// A numbered, parameterized error carried under `body.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Numeric error code.
    pub id: i64,
    /// Message template with `{name}` placeholders.
    pub format: String,
    /// Placeholder values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Whether the client should show the message to the user.
    pub show_user: bool,
    /// Whether the client may send the message to telemetry.
    pub send_telemetry: bool,
}

impl ErrorMessage {
    /// A user-visible error with no placeholder values.
    pub fn new(id: i64, format: &str) -> Self {
        Self {
            id,
            format: format.to_string(),
            variables: BTreeMap::new(),
            show_user: true,
            send_telemetry: false,
        }
    }

    /// Attach a placeholder value.
    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    /// The format string with every known `{name}` replaced by its value.
    /// Unknown placeholders are left untouched.
    /// Substituted values are never scanned again.
    pub fn expand(&self) -> String {
        let mut out = String::with_capacity(self.format.len());
        let mut rest = self.format.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let value = tail
                .find('}')
                .and_then(|close| Some((close, self.variables.get(&tail[1..close])?)));
            match value {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// 1014: no handler for the command.
    pub fn unrecognized_request(command: &str) -> Self {
        Self::new(1014, "unrecognized request: {_request}").with_var("_request", command)
    }

    /// 1015: `initialize` received an unknown `pathFormat`.
    pub fn bad_path_format(format: &str) -> Self {
        Self::new(1015, "initialize: bad value '{_format}' for pathFormat")
            .with_var("_format", format)
    }

    /// 1020: the `source` request named an unknown source.
    pub fn source_not_found(path: &str) -> Self {
        Self::new(1020, "source not found: {_path}").with_var("_path", path)
    }

    /// 1104: bad argument shape or a failure inside the handler.
    pub fn request_failed(command: &str, exception: impl Into<String>) -> Self {
        Self::new(
            1104,
            "error while processing request '{_request}' (exception: {_exception})",
        )
        .with_var("_request", command)
        .with_var("_exception", exception)
    }

    /// 3010: `setBreakpoints` without a usable `source.path`.
    pub fn malformed_breakpoint_source() -> Self {
        Self {
            show_user: false,
            send_telemetry: true,
            ..Self::new(3010, "setBreakpoints: property 'source' is empty or malformed")
        }
    }
}

// ---------------------------------------------------------------------------
// Request arguments
// ---------------------------------------------------------------------------

/// Arguments for the `initialize` request. Only the conventions the router
/// negotiates are read; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    /// ID of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    /// Whether client lines are 1-based. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_start_at1: Option<bool>,
    /// Path format: "path" or "uri". Defaults to "uri".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_format: Option<String>,
}

/// A source location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Short name of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File system path or URI, per the negotiated convention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A source breakpoint (client-side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// The source line of the breakpoint.
    pub line: i64,
    /// Optional column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Arguments for the `setBreakpoints` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    /// The source to set breakpoints for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Legacy form: plain line numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<i64>>,
    /// Breakpoints to set (replaces all previous ones).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
}

impl SetBreakpointsArguments {
    /// Requested lines in request order, from whichever form is present.
    pub fn requested_lines(&self) -> Vec<i64> {
        match (&self.lines, &self.breakpoints) {
            (Some(lines), _) => lines.clone(),
            (None, Some(bps)) => bps.iter().map(|b| b.line).collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// A breakpoint as returned by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Whether the breakpoint has been verified.
    pub verified: bool,
    /// Line of the breakpoint, in client coordinates.
    pub line: i64,
}

/// Arguments for the `stackTrace` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    /// Thread to retrieve frames for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Maximum number of frames to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

/// Arguments for the `variables` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    /// The container to expand.
    #[serde(default)]
    pub variables_reference: i64,
}

/// Arguments for the `source` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    /// The source to retrieve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// Arguments for the `evaluate` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    /// The expression to evaluate.
    #[serde(default)]
    pub expression: String,
    /// Stack frame in whose context to evaluate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    /// Context: "watch", "repl", "hover".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime types and response bodies
// ---------------------------------------------------------------------------

/// A thread in the debuggee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Unique identifier of the thread.
    pub id: i64,
    /// Human-readable name of the thread.
    pub name: String,
}

/// A stack frame in the call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Unique identifier for the stack frame.
    pub id: i64,
    /// Name of the frame (function name or placeholder marker).
    pub name: String,
    /// Source location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Line within the source.
    pub line: i64,
    /// Column within the source.
    pub column: i64,
    /// End line of the range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    /// End column of the range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<i64>,
}

impl StackFrame {
    /// A synthetic frame with no source, used for markers such as `(native)`.
    pub fn marker(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            source: None,
            line: 0,
            column: 0,
            end_line: None,
            end_column: None,
        }
    }
}

/// A scope (container for variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Name of the scope.
    pub name: String,
    /// Variables reference for this scope.
    pub variables_reference: i64,
    /// Whether the scope is expensive to resolve.
    pub expensive: bool,
}

/// A variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Name of the variable.
    pub name: String,
    /// Value of the variable as a string.
    pub value: String,
    /// If > 0, the variable has children accessed via this reference.
    pub variables_reference: i64,
}

impl Variable {
    /// A leaf variable with no children.
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variables_reference: 0,
        }
    }
}

/// Response body for `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    /// The result string.
    pub result: String,
    /// Type of the result.
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    /// If > 0, the result has children.
    pub variables_reference: i64,
}

// ---------------------------------------------------------------------------
// Event bodies
// ---------------------------------------------------------------------------

/// Body of the `stopped` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// The reason for the stop.
    pub reason: String,
    /// Thread that stopped.
    pub thread_id: i64,
    /// Additional text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Body of the `output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    /// Output category.
    pub category: String,
    /// The output text.
    pub output: String,
}

/// Body of the `thread` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    /// "started" or "exited".
    pub reason: String,
    /// The thread the event is about.
    pub thread_id: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
