//! Transport-agnostic, full-duplex JSON-RPC 2.0 engine.
//!
//! This crate is the "hard engineering" half of the TW client: a framed byte
//! stream turned into JSON-RPC envelopes ([`transport`]), a bidirectional
//! engine that issues correlated calls and dispatches inbound
//! requests/notifications to registered handlers ([`engine`]), the handler
//! table those methods live in ([`registry`]), and the shared error taxonomy
//! ([`error`]).
//!
//! It knows nothing about result sets, prepared queries, subscriptions, or
//! any other TW-specific concept — that stateful object model is built on
//! top of this crate in `tw-client`, the way `jsonrpc-client-pubsub` is built
//! on top of `jsonrpc-client-core` in the crate this one is modeled on.

pub mod engine;
pub mod error;
pub mod message;
pub mod registry;
pub mod transport;

pub use engine::RpcEngine;
pub use error::{Error, Result};
pub use message::{Envelope, RpcError};
pub use registry::{BoxFuture, FnHandler, MethodHandler, MethodRegistry};
