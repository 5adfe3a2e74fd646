//! DAP transport layer: Content-Length based message framing.
//!
//! Reading goes through [`FrameDecoder`], which accumulates raw bytes and
//! yields complete bodies. Writing goes through [`MessageSink`], which owns
//! the connection's sequence counter.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::DapError;
use crate::protocol::{ProtocolMessage, Request};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;

/// Encode a message into a DAP wire-format frame with Content-Length header.
pub fn encode_message(msg: &ProtocolMessage) -> Result<Vec<u8>, DapError> {
    let body =
        serde_json::to_vec(msg).map_err(|e| DapError::InvalidMessage(format!("serialize: {e}")))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse one frame body into a protocol message.
pub fn parse_body(body: &[u8]) -> Result<ProtocolMessage, DapError> {
    serde_json::from_slice(body).map_err(|e| DapError::InvalidMessage(format!("JSON parse error: {e}")))
}

/// Parse the Content-Length value from the header section.
fn parse_content_length(header: &str) -> Result<usize, DapError> {
    for line in header.split("\r\n") {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let value = value.trim();
            return value.parse::<usize>().map_err(|e| {
                DapError::Transport(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(DapError::Transport("missing Content-Length header".into()))
}

// ---------------------------------------------------------------------------
// Incremental decoding
// ---------------------------------------------------------------------------

/// Incremental frame decoder fed with arbitrary chunks of the input stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    body_length: Option<usize>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Remove and return the next complete body, if one is buffered.
    ///
    /// A header block without a usable Content-Length is consumed and
    /// discarded so the stream can resynchronize on the next header.
    pub fn next_body(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(len) = self.body_length {
                if self.buffer.len() < len {
                    return None;
                }
                let body: Vec<u8> = self.buffer.drain(..len).collect();
                self.body_length = None;
                return Some(body);
            }

            let sep = find_subslice(&self.buffer, HEADER_TERMINATOR)?;
            let header = String::from_utf8_lossy(&self.buffer[..sep]).into_owned();
            self.buffer.drain(..sep + HEADER_TERMINATOR.len());
            match parse_content_length(&header) {
                Ok(len) => self.body_length = Some(len),
                Err(e) => tracing::warn!(error = %e, "dropping malformed frame header"),
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

struct SinkState {
    writer: Box<dyn Write + Send>,
    next_seq: i64,
}

/// Serialized writer for one connection. Sequence numbers are assigned and
/// the frame written under the same lock, so seq order equals wire order.
pub struct MessageSink {
    state: Mutex<SinkState>,
}

impl MessageSink {
    /// Wrap an output stream. The first message gets seq 1.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(SinkState { writer, next_seq: 1 }),
        }
    }

    /// Assign the next sequence number to `msg`, write it and flush.
    ///
    /// Write failures are logged and swallowed; the read loop is the
    /// authority on whether the peer is gone. Returns the assigned seq.
    pub fn send(&self, mut msg: ProtocolMessage) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = state.next_seq;
        state.next_seq += 1;
        msg.set_seq(seq);

        let frame = match encode_message(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(seq, error = %e, "failed to encode outgoing message");
                return seq;
            }
        };
        let written = state
            .writer
            .write_all(&frame)
            .and_then(|()| state.writer.flush());
        if let Err(e) = written {
            tracing::warn!(seq, error = %e, "failed to write outgoing message");
        }
        seq
    }
}

impl std::fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSink").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Read frames from `input` until end of stream, an I/O error, or `stop`
/// is set, dispatching every request in arrival order.
///
/// Malformed bodies and non-request messages are logged and dropped.
pub fn run_read_loop<R, F>(mut input: R, stop: &AtomicBool, mut dispatch: F) -> Result<(), DapError>
where
    R: Read,
    F: FnMut(Request),
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];

    while !stop.load(Ordering::SeqCst) {
        let n = match input.read(&mut chunk) {
            Ok(0) => {
                tracing::debug!("peer closed the input stream");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DapError::Io(e)),
        };
        decoder.push(&chunk[..n]);

        while let Some(body) = decoder.next_body() {
            match parse_body(&body) {
                Ok(ProtocolMessage::Request(req)) => {
                    dispatch(req);
                    if stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                }
                Ok(other) => {
                    tracing::debug!(seq = other.seq(), "ignoring non-request message");
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
            }
        }
    }
    Ok(())
}
