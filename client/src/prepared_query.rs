//! `PreparedQuery<T>`: a query registered once on the server with named or
//! positional parameter slots, executed repeatedly with different
//! arguments. `sql`-language queries are type-checked client-side against
//! the server-declared input signature before a call is ever sent; `fol`
//! queries skip that check.
//!
//! Holds weak, non-owning references to every `ResultSet` it has produced
//! so disposing the prepared query cascades to its still-open result sets
//! without the result sets having to own it back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;
use tw_client_core::RpcEngine;

use crate::error::{Error, Result};
use crate::result_set::{ResultSet, ResultSetHandle};
use crate::types::{ExecuteQueryResult, InputSignature, PreparedQueryRegistration, Restriction, Signature};

struct Inner<T> {
    engine: Arc<RpcEngine>,
    handle: i64,
    query: String,
    namespace: Option<String>,
    language: String,
    input: InputSignature,
    output_signature: Signature,
    uses_named_parameters: bool,
    name_index: HashMap<String, usize>,
    slots: Vec<Option<Value>>,
    restriction: Restriction,
    outstanding: Vec<ResultSetHandle<T>>,
    disposed: bool,
}

/// A server-registered, parameterized query.
pub struct PreparedQuery<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for PreparedQuery<T> {
    fn clone(&self) -> Self {
        PreparedQuery { inner: Arc::clone(&self.inner) }
    }
}

impl<T> PreparedQuery<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) async fn prepare(
        engine: Arc<RpcEngine>,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        restriction: Restriction,
    ) -> Result<Self> {
        let query = query.into();
        let language = language.into();
        let params = json!({ "query": query, "language": language, "namespace": namespace });
        let registration: PreparedQueryRegistration = engine.call("prepare-query", params).await?;
        Ok(Self::from_registration(engine, query, language, namespace, registration, restriction))
    }

    fn from_registration(
        engine: Arc<RpcEngine>,
        query: String,
        language: String,
        namespace: Option<String>,
        registration: PreparedQueryRegistration,
        restriction: Restriction,
    ) -> Self {
        let slot_count = registration.input_signature.names.len();
        let name_index = registration
            .input_signature
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();
        PreparedQuery {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                handle: registration.handle,
                query,
                namespace,
                language,
                input: registration.input_signature,
                output_signature: registration.output_signature,
                uses_named_parameters: registration.uses_named_parameters,
                name_index,
                slots: vec![None; slot_count],
                restriction,
                outstanding: Vec::new(),
                disposed: false,
            })),
        }
    }

    /// Re-registers this query on the server under a fresh handle, copying
    /// the current parameter slots (whether or not they're fully set) but
    /// none of this query's outstanding result sets — the clone starts with
    /// no live result sets of its own, useful for a caller that wants a
    /// second, independently executable handle to the same query without
    /// racing this one's parameter assignments.
    pub async fn try_clone(&self) -> Result<Self> {
        let (engine, query, language, namespace, restriction, slots) = {
            let guard = self.inner.lock().await;
            ensure_not_disposed(&guard)?;
            (
                Arc::clone(&guard.engine),
                guard.query.clone(),
                guard.language.clone(),
                guard.namespace.clone(),
                guard.restriction,
                guard.slots.clone(),
            )
        };
        let params = json!({ "query": query, "language": language, "namespace": namespace });
        let registration: PreparedQueryRegistration =
            engine.call("prepare-query", params).await?;
        let clone = Self::from_registration(
            Arc::clone(&engine),
            query,
            language,
            namespace,
            registration,
            restriction,
        );
        {
            let mut guard = clone.inner.lock().await;
            if slots.len() == guard.slots.len() {
                guard.slots = slots;
            }
        }
        Ok(clone)
    }

    /// The declared output signature.
    pub async fn output_signature(&self) -> Signature {
        self.inner.lock().await.output_signature.clone()
    }

    /// Sets the parameter at `index` (0-based, matching slot order in the
    /// server-declared input signature).
    pub async fn set_positional(&self, index: usize, value: Value) -> Result<()> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        if guard.uses_named_parameters {
            return Err(Error::UnknownParam(format!(
                "positional index {index}: this query uses named parameters"
            )));
        }
        if index >= guard.slots.len() {
            return Err(Error::UnknownParam(format!("positional index {index}")));
        }
        check_type(&guard, index, &value)?;
        guard.slots[index] = Some(value);
        Ok(())
    }

    /// Sets the parameter named `name` (case-insensitive lookup against the
    /// server-declared input signature).
    pub async fn set_named(&self, name: &str, value: Value) -> Result<()> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        if !guard.uses_named_parameters {
            return Err(Error::UnknownParam(format!(
                "`{name}`: this query uses positional parameters"
            )));
        }
        let index = *guard
            .name_index
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::UnknownParam(name.to_owned()))?;
        check_type(&guard, index, &value)?;
        guard.slots[index] = Some(value);
        Ok(())
    }

    /// Resets every parameter slot back to unset.
    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        for slot in guard.slots.iter_mut() {
            *slot = None;
        }
        Ok(())
    }

    /// Whether every parameter slot currently has a value.
    pub async fn fully_instantiated(&self) -> bool {
        self.inner.lock().await.slots.iter().all(Option::is_some)
    }

    /// Executes the query with the currently-set parameters, producing a
    /// fresh [`ResultSet`]. Fails with [`Error::IncompleteParams`] if any
    /// slot is still unset.
    pub async fn execute(&self) -> Result<ResultSet<T>> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        let inputs: Vec<Value> = guard
            .slots
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::IncompleteParams)?;
        let params = json!({
            "handle": guard.handle,
            "inputs": inputs,
            "limit": guard.restriction.limit,
            "timelimit": guard.restriction.timelimit,
            "check-update": false,
        });
        let engine = Arc::clone(&guard.engine);
        let restriction = guard.restriction;
        drop(guard);

        let result: ExecuteQueryResult<T> = engine.call("create-resultset", params).await?;
        let result_set = ResultSet::from_initial(engine, result, restriction);

        let mut guard = self.inner.lock().await;
        guard.outstanding.push(result_set.downgrade());
        Ok(result_set)
    }

    /// Releases the server-side prepared query and cascades disposal to
    /// every result set it has produced that's still open.
    pub async fn dispose(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        dispose_locked(&mut guard).await;
        Ok(())
    }
}

fn ensure_not_disposed<T>(inner: &Inner<T>) -> Result<()> {
    if inner.disposed {
        return Err(Error::Disposed);
    }
    Ok(())
}

/// Checks a candidate parameter value against the server-declared
/// acceptable types for `index`, when the query language requires it
/// (`sql`; `fol` skips type checking).
fn check_type<T>(inner: &Inner<T>, index: usize, value: &Value) -> Result<()> {
    if inner.language != "sql" {
        return Ok(());
    }
    let declared = &inner.input.types[index];
    if declared.iter().any(|t| value_matches_server_type(value, t)) {
        return Ok(());
    }
    let slot = inner
        .input
        .names
        .get(index)
        .cloned()
        .unwrap_or_else(|| index.to_string());
    Err(Error::ParamType { slot, declared: declared.clone() })
}

fn value_matches_server_type(value: &Value, server_type: &str) -> bool {
    use crate::types::LocalType;
    match LocalType::from_server_type(server_type) {
        LocalType::Any => true,
        LocalType::Int64 => value.is_i64() || value.is_u64(),
        LocalType::Float64 => value.is_f64() || value.is_i64() || value.is_u64(),
        LocalType::Number => value.is_number(),
        LocalType::Boolean => value.is_boolean(),
        LocalType::String | LocalType::DateTime | LocalType::Duration => value.is_string(),
    }
}

async fn dispose_locked<T: Send + 'static>(inner: &mut Inner<T>) {
    if inner.disposed {
        return;
    }
    inner.disposed = true;
    for outstanding in inner.outstanding.drain(..) {
        outstanding.dispose_if_alive().await;
    }
    let params = json!([inner.handle]);
    if let Err(e) = inner
        .engine
        .call::<serde_json::Value, _>("release-query", params)
        .await
    {
        warn!(error = %e, handle = inner.handle, "failed to dispose prepared query on server");
    }
}

impl<T> Drop for PreparedQuery<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) != 1 {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut guard = inner.lock().await;
            dispose_locked(&mut guard).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocalType;

    #[test]
    fn integer_type_accepts_i64_and_rejects_string() {
        assert_eq!(LocalType::from_server_type("integer"), LocalType::Int64);
        assert!(value_matches_server_type(&json!(5), "integer"));
        assert!(!value_matches_server_type(&json!("5"), "integer"));
    }

    #[test]
    fn float_type_accepts_integral_values() {
        assert!(value_matches_server_type(&json!(5), "double"));
        assert!(value_matches_server_type(&json!(5.5), "double"));
        assert!(!value_matches_server_type(&json!(true), "double"));
    }

    #[test]
    fn any_type_accepts_everything() {
        assert!(value_matches_server_type(&json!(null), ""));
        assert!(value_matches_server_type(&json!([1, 2]), "mystery"));
    }
}
