//! moonlit-dap: Debug Adapter Protocol server for embedded moonlit scripts.
//!
//! This crate lets an IDE pause, inspect, and step through a script running
//! inside a host process. It handles message framing, the request router,
//! the cross-thread bridge the interpreter blocks on, and the concrete
//! adapter translating requests into bridge operations.

pub mod action;
pub mod adapter;
pub mod bridge;
pub mod capabilities;
pub mod detached;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod repl;
pub mod server;
pub mod session;
pub mod source;
pub mod transport;
pub mod value;
pub mod watch;

// Re-export key types for convenience.
pub use action::{ActionKind, DebuggerAction};
pub use adapter::ScriptDebugSession;
pub use bridge::{DebugBridge, DebugService, Debugger, DebuggerClient};
pub use capabilities::AdapterCapabilities;
pub use detached::DetachedSession;
pub use error::DapError;
pub use protocol::*;
pub use repl::ReplCommand;
pub use server::DebugServer;
pub use session::{Command, Coordinates, Lifecycle, RequestHandler, Session, SessionContext, SessionState};
pub use source::{RuntimeError, SourceCode, SourceInfo, SourceRef};
pub use transport::MessageSink;
pub use value::DebugValue;
pub use watch::{WatchItem, WatchType};
