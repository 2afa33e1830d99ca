//! The error taxonomy for the RPC engine.
//!
//! Every variant carries (or computes) the JSON-RPC numeric code it should be
//! reported under when it crosses the wire as a response `error` object.
//! Variants with no wire meaning (they can only ever happen locally) get a
//! sentinel code in the `-328xx` range so they never collide with a real
//! JSON-RPC or application error code.

use serde_json::Value;

/// Standard JSON-RPC 2.0 error code: malformed JSON on the wire.
pub const CODE_PARSE_ERROR: i64 = -32700;
/// Standard JSON-RPC 2.0 error code: the request envelope itself is malformed.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// Standard JSON-RPC 2.0 error code: no handler registered under that method name.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Standard JSON-RPC 2.0 error code: params didn't decode against the handler's signature.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Standard JSON-RPC 2.0 error code: failure internal to this library while handling a message.
pub const CODE_INTERNAL_ERROR: i64 = -32603;
/// Non-standard code this system uses for "the connection died while a call was outstanding".
pub const CODE_SERVER_ERROR: i64 = -32000;

/// Errors produced by the RPC engine and the frame transport beneath it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bytes on the wire did not parse as JSON, or parsed as JSON that isn't a
    /// valid JSON-RPC envelope.
    #[error("malformed JSON-RPC message: {0}")]
    ParseError(String),

    /// A request envelope was structurally incomplete (e.g. has an `id` but
    /// no `method`, and isn't a valid response either).
    #[error("invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    /// No handler is registered for the method name in an inbound request or
    /// notification.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The handler's declared parameter shape couldn't decode the inbound
    /// `params` value.
    #[error("invalid params for method {method}: {reason}")]
    InvalidParams {
        /// Method whose handler rejected the params.
        method: String,
        /// Human-readable decode failure.
        reason: String,
    },

    /// Failure internal to this library, not attributable to the peer.
    #[error("internal error: {0}")]
    InternalError(String),

    /// The connection was lost, either while a call was outstanding or while
    /// attempting a new one.
    #[error("connection to server lost{}", .0.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    Disconnected(Option<String>),

    /// `call`/`notify` was invoked before `RpcEngine::start` spawned the
    /// reader/writer workers.
    #[error("RPC engine has not been started")]
    NotStarted,

    /// `register_method` was called for a name that's already registered.
    #[error("method `{0}` is already registered")]
    DuplicateMethod(String),

    /// The peer replied with a JSON-RPC error object.
    #[error("server returned error {code}: {message}")]
    Remote {
        /// JSON-RPC error code reported by the peer.
        code: i64,
        /// JSON-RPC error message reported by the peer.
        message: String,
        /// Optional structured error data reported by the peer.
        data: Option<Value>,
    },
}

impl Error {
    /// The JSON-RPC numeric code this error should be reported under.
    pub fn code(&self) -> i64 {
        match self {
            Error::ParseError(_) => CODE_PARSE_ERROR,
            Error::InvalidRequest(_) => CODE_INVALID_REQUEST,
            Error::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            Error::InvalidParams { .. } => CODE_INVALID_PARAMS,
            Error::InternalError(_) => CODE_INTERNAL_ERROR,
            Error::Disconnected(_) => CODE_SERVER_ERROR,
            Error::NotStarted => -32801,
            Error::DuplicateMethod(_) => -32802,
            Error::Remote { code, .. } => *code,
        }
    }

    pub(crate) fn disconnected(reason: impl Into<String>) -> Self {
        Error::Disconnected(Some(reason.into()))
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
