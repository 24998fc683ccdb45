//! Client error taxonomy.

use smol_str::SmolStr;
use thiserror::Error;

/// A received message that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("malformed JSON payload: {0}")]
    MalformedJson(String),

    /// Envelope is valid JSON but is missing a required field.
    #[error("missing or invalid field '{field}' in {kind}")]
    MissingField { kind: &'static str, field: &'static str },

    /// Envelope `type` is not request/response/event.
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// A body did not match the shape expected for its command or event.
    #[error("invalid {what}: {message}")]
    InvalidBody { what: SmolStr, message: String },

    /// Frame header block ended without a `Content-Length`.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// `Content-Length` value is not a byte count.
    #[error("invalid Content-Length '{0}'")]
    InvalidContentLength(String),

    /// A header line is not UTF-8 text.
    #[error("undecodable header line '{0}'")]
    InvalidHeader(String),
}

impl ProtocolError {
    pub(crate) fn invalid_body(what: impl Into<SmolStr>, err: &serde_json::Error) -> Self {
        Self::InvalidBody {
            what: what.into(),
            message: err.to_string(),
        }
    }
}

/// Errors surfaced to callers of the client, session and variable tree.
///
/// Errors are cloneable so that concurrent waiters on one in-flight request
/// can share a single outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DapError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The adapter answered with `success = false`.
    #[error("adapter rejected '{command}': {message}")]
    Adapter { command: SmolStr, message: String },

    /// A `variablesReference` was used after its generation was discarded.
    #[error("stale variables reference {reference} (generation {generation})")]
    StaleReference { reference: i64, generation: u64 },

    /// The transport closed; no further requests can complete.
    #[error("debug adapter disconnected")]
    Disconnected,

    /// The adapter failed to evaluate an expression.
    #[error("failed to evaluate '{expression}': {message}")]
    Evaluate { expression: String, message: String },

    /// A frame id used after its thread resumed or stopped again.
    #[error("stale stack frame {frame_id}")]
    StaleFrame { frame_id: i64 },

    /// A frame-scoped request targeted a thread that is not stopped.
    #[error("thread {thread_id} is not stopped")]
    NotStopped { thread_id: i64 },

    /// No stopped thread or frame is available for a frame-scoped request.
    #[error("no frame selected")]
    NoFrameSelected,

    /// A root node (scope or evaluation result) has no container to write through.
    #[error("variable '{name}' cannot be set")]
    NotEditable { name: String },

    /// The adapter did not advertise the capability a request needs.
    #[error("adapter does not support '{command}'")]
    Unsupported { command: SmolStr },

    #[error("transport error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for DapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result alias used across the client.
pub type DapResult<T> = std::result::Result<T, DapError>;
