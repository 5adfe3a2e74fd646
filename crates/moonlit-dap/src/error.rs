//! DAP error types.

use thiserror::Error;

/// Errors from debug adapter operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// Malformed frame header or un-decodable body.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON that is not a valid protocol envelope.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Underlying stream or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No attached debugger carries this id.
    #[error("cannot find debugger with id {0}")]
    UnknownDebugger(usize),

    /// The request is not valid in the current session state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// The server has already been started.
    #[error("server already started")]
    AlreadyStarted,

    /// Session has already been terminated.
    #[error("session already terminated")]
    Terminated,
}
