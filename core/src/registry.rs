//! Method Registry: a connection-local mapping from method name to a handler
//! descriptor, shared by application methods and the library-internal
//! notification labels that handle-bound objects reserve for themselves.
//!
//! Modeled as a table of trait objects — ad-hoc polymorphism where each
//! handler exposes one `invoke` entry point that decodes its own params and
//! performs its own work, so the registry itself stays generic over what the
//! handler actually does.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{Error, Result};

/// A boxed, type-erased future, the shape every handler invocation returns.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registered method handler: decodes inbound `params` and produces a
/// result (or fails with [`Error::InvalidParams`] / any application error).
///
/// Implemented directly by application code that calls
/// [`crate::engine::RpcEngine::register_method`], and by the notification
/// routers that `PolledQuery`, `Subscription`, and `BatchSubscription`
/// install under their reserved labels in the `tw-client` crate.
pub trait MethodHandler: Send + Sync {
    /// Decode `params` and run the handler, yielding the JSON value to put
    /// in a response's `result` field (for requests) or simply performing a
    /// side effect (for notifications, whose return value is discarded).
    fn invoke(&self, params: Option<Value>) -> BoxFuture<Result<Value>>;
}

/// Adapts any `Fn(Option<Value>) -> BoxFuture<Result<Value>>` closure into a
/// [`MethodHandler`], for the common case of registering a plain closure.
pub struct FnHandler<F>(pub F)
where
    F: Fn(Option<Value>) -> BoxFuture<Result<Value>> + Send + Sync;

impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> BoxFuture<Result<Value>> + Send + Sync,
{
    fn invoke(&self, params: Option<Value>) -> BoxFuture<Result<Value>> {
        (self.0)(params)
    }
}

/// Thread-safe name → handler table. Registration, lookup, and removal can
/// race freely with dispatch from the reader task.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: DashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { handlers: DashMap::new() }
    }

    /// Registers `handler` under `name`. Returns `false` without installing
    /// anything if the name is already taken.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> bool {
        match self.handlers.entry(name.into()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                true
            }
        }
    }

    /// Removes the handler registered under `name`. Returns `false` if there
    /// was none.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Looks up the handler registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Invokes the handler registered under `method`, or fails with
    /// [`Error::MethodNotFound`] if there is none.
    pub async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match self.get(method) {
            Some(handler) => handler.invoke(params).await,
            None => Err(Error::MethodNotFound(method.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> Arc<dyn MethodHandler> {
        Arc::new(FnHandler(|_params: Option<Value>| {
            Box::pin(async { Ok(Value::Null) }) as BoxFuture<Result<Value>>
        }))
    }

    #[test]
    fn duplicate_registration_fails_without_replacing() {
        let registry = MethodRegistry::new();
        assert!(registry.register("noop", noop_handler()));
        assert!(!registry.register("noop", noop_handler()));
    }

    #[test]
    fn register_then_unregister_leaves_registry_empty() {
        let registry = MethodRegistry::new();
        assert!(registry.register("noop", noop_handler()));
        assert!(registry.unregister("noop"));
        assert!(registry.get("noop").is_none());
        assert!(!registry.unregister("noop"));
    }

    #[tokio::test]
    async fn dispatch_unknown_method_is_method_not_found() {
        let registry = MethodRegistry::new();
        let err = registry.dispatch("missing", None).await.unwrap_err();
        assert_eq!(err.code(), crate::error::CODE_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_known_method_invokes_handler() {
        let registry = MethodRegistry::new();
        registry.register("echo", Arc::new(FnHandler(|params: Option<Value>| {
            Box::pin(async move { Ok(params.unwrap_or(Value::Null)) }) as BoxFuture<Result<Value>>
        })));
        let result = registry.dispatch("echo", Some(json!(42))).await.unwrap();
        assert_eq!(result, json!(42));
    }
}
