//! The error taxonomy additions specific to the stateful object model:
//! parameter misuse on prepared queries, schedule validation, result-set
//! invariant violations, subscription activation invariant violations, and
//! disposed/unregistered-handle misuse. Anything that's really a transport
//! or wire-protocol failure is a [`tw_client_core::Error`] and is wrapped,
//! not duplicated.

/// Errors produced by the `tw-client` object model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying RPC engine or transport failed.
    #[error(transparent)]
    Rpc(#[from] tw_client_core::Error),

    /// A `sql`-language prepared-query parameter was set to a value whose
    /// runtime type isn't one of the types declared for that slot.
    #[error("parameter `{slot}` does not accept a value of this type (declared types: {declared:?})")]
    ParamType {
        /// Parameter name or positional label the caller tried to set.
        slot: String,
        /// The types the server declared as acceptable for this slot.
        declared: Vec<String>,
    },

    /// `set(name, ...)` was called with a name that isn't in the prepared
    /// query's input signature.
    #[error("unknown parameter `{0}`")]
    UnknownParam(String),

    /// `execute()` was called on a prepared query that still has unset
    /// parameter slots.
    #[error("not every parameter slot has been set")]
    IncompleteParams,

    /// A `Schedule` failed validation.
    #[error("invalid schedule: {0}")]
    ScheduleError(String),

    /// A `ResultSet` invariant was violated (e.g. `reset` after disposal).
    #[error("result set error: {0}")]
    ResultSetError(String),

    /// An operation requiring a server-assigned handle was attempted on an
    /// object that doesn't have one (a bare `View`, or a not-yet-registered
    /// object).
    #[error("object has no server-assigned handle")]
    NotRegistered,

    /// An operation was attempted on an object after it was disposed.
    #[error("object has already been disposed")]
    Disposed,

    /// A `Subscription`/`BatchSubscription` activation invariant was
    /// violated (active XOR in-batch, double-activate, cross-client batch).
    #[error("subscription error: {0}")]
    SubscriptionError(String),

    /// `validate_query` reported the query itself as invalid (as opposed to
    /// an internal/server failure while validating it).
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl Error {
    /// The JSON-RPC-style numeric code this error should be reported under.
    /// Delegates to [`tw_client_core::Error::code`] for [`Error::Rpc`];
    /// variants defined only in this crate get a sentinel in the
    /// `-328xx` range, one band below `tw-client-core`'s own sentinels.
    pub fn code(&self) -> i64 {
        match self {
            Error::Rpc(e) => e.code(),
            Error::ParamType { .. } => -32850,
            Error::UnknownParam(_) => -32851,
            Error::IncompleteParams => -32852,
            Error::ScheduleError(_) => -32853,
            Error::ResultSetError(_) => -32854,
            Error::NotRegistered => -32855,
            Error::Disposed => -32856,
            Error::SubscriptionError(_) => -32857,
            Error::InvalidQuery(_) => -32858,
        }
    }
}

/// Convenience alias used throughout `tw-client`.
pub type Result<T> = std::result::Result<T, Error>;
