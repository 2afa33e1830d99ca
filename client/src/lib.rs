//! The stateful TW query/subscription object model, built on top of
//! `tw-client-core`'s transport-agnostic JSON-RPC engine — the same
//! layering as `jsonrpc-client-pubsub` sitting on `jsonrpc-client-core`.
//!
//! [`Client`] is the entry point: it owns the connection and produces
//! [`View`]/[`PreparedQuery`]/[`PolledQuery`]/[`Subscription`]/
//! [`BatchSubscription`] objects, each a thin, cheaply-cloned handle onto
//! server-side state reached back through the shared `RpcEngine`.

pub mod batch_subscription;
pub mod client;
pub mod config;
pub mod error;
pub mod polled_query;
pub mod prepared_query;
pub mod result_set;
pub mod schedule;
pub mod subscription;
pub mod types;
pub mod view;

pub use batch_subscription::BatchSubscription;
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use polled_query::PolledQuery;
pub use prepared_query::PreparedQuery;
pub use result_set::ResultSet;
pub use schedule::{CalendarSpec, Schedule, ScheduleEntry};
pub use subscription::Subscription;
pub use types::{
    BatchMatch, BatchNotice, ExecuteQueryResult, InputSignature, LocalType,
    PolledQueryErrorNotice, PolledQueryRegistration, PreparedQueryRegistration, RelData,
    RelElement, RelGroup, Restriction, RowsDelta, Signature, SignatureElement, TwRuntimeMeasure,
};
pub use view::View;
