//! `ResultSet<T>`: a forward-only cursor over a query's rows. Rows already
//! pulled from the server sit in a FIFO cache; advancing past the cache
//! triggers a `next-resultset-batch` call for more, unless the server has
//! already reported the result exhausted.
//!
//! Guarded by a per-object `tokio::sync::Mutex`, and held behind an `Arc` so
//! a `PreparedQuery` can keep a weak, non-owning handle to every result set
//! it has produced for cascade disposal, matching `ClientHandle` being
//! cheaply cloneable and shared across the subscriptions it spawns.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;
use tw_client_core::RpcEngine;

use crate::error::{Error, Result};
use crate::types::{ExecuteQueryResult, Restriction, Signature};

struct Inner<T> {
    engine: Arc<RpcEngine>,
    handle: Option<i64>,
    signature: Option<Signature>,
    exhausted: bool,
    cache: VecDeque<T>,
    current: Option<T>,
    restriction: Restriction,
    disposed: bool,
}

/// A forward-only, server-backed cursor over a query's rows.
pub struct ResultSet<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ResultSet<T> {
    fn clone(&self) -> Self {
        ResultSet { inner: Arc::clone(&self.inner) }
    }
}

/// A weak, non-owning reference a `PreparedQuery` keeps to a `ResultSet` it
/// produced, used only to cascade-dispose it.
pub(crate) struct ResultSetHandle<T> {
    inner: Weak<Mutex<Inner<T>>>,
}

impl<T: Send + 'static> ResultSetHandle<T> {
    pub(crate) async fn dispose_if_alive(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut guard = inner.lock().await;
            dispose_locked(&mut guard).await;
        }
    }
}

impl<T> ResultSet<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn from_initial(
        engine: Arc<RpcEngine>,
        result: ExecuteQueryResult<T>,
        restriction: Restriction,
    ) -> Self {
        ResultSet {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                handle: result.handle,
                signature: result.signature,
                exhausted: result.exhausted,
                cache: result.tuples.into(),
                current: None,
                restriction,
                disposed: false,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> ResultSetHandle<T> {
        ResultSetHandle { inner: Arc::downgrade(&self.inner) }
    }

    /// The output signature reported with the initial batch, if any.
    pub async fn signature(&self) -> Option<Signature> {
        self.inner.lock().await.signature.clone()
    }

    /// Advances the cursor by one row, pulling another batch from the
    /// server if the local cache is empty and the server hasn't reported
    /// exhaustion. Returns `Ok(false)` once there are no more rows.
    pub async fn move_next(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        ensure_not_disposed(&guard)?;
        if guard.cache.is_empty() && !guard.exhausted {
            if let Err(e) = fill_cache(&mut guard).await {
                dispose_locked(&mut guard).await;
                return Err(Error::ResultSetError(e.to_string()));
            }
        }
        match guard.cache.pop_front() {
            Some(row) => {
                guard.current = Some(row);
                Ok(true)
            }
            None => {
                guard.current = None;
                Ok(false)
            }
        }
    }

    /// Advances the cursor up to `n` times, collecting each row produced
    /// along the way. Stops early, with fewer than `n` rows, once the
    /// result set is exhausted.
    pub async fn pull(&self, n: usize) -> Result<Vec<T>>
    where
        T: Clone,
    {
        let mut rows = Vec::with_capacity(n);
        for _ in 0..n {
            let mut guard = self.inner.lock().await;
            ensure_not_disposed(&guard)?;
            if guard.cache.is_empty() && !guard.exhausted {
                if let Err(e) = fill_cache(&mut guard).await {
                    dispose_locked(&mut guard).await;
                    return Err(Error::ResultSetError(e.to_string()));
                }
            }
            match guard.cache.pop_front() {
                Some(row) => {
                    guard.current = Some(row.clone());
                    rows.push(row);
                }
                None => {
                    guard.current = None;
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// A snapshot of the rows currently cached locally, without touching
    /// the network.
    pub async fn cache_snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().await.cache.iter().cloned().collect()
    }

    /// The row last produced by [`ResultSet::move_next`], or `None` before
    /// the first successful advance or once the cursor has run past the end.
    pub async fn current(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().await.current.clone()
    }

    /// Whether the server has reported no further rows remain.
    pub async fn is_exhausted(&self) -> bool {
        self.inner.lock().await.exhausted
    }

    /// Releases the server-side result set. Idempotent; safe to call more
    /// than once, and safe to skip (`Drop` releases best-effort). Disposal
    /// is fatal-to-reset: no operation after this succeeds.
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

async fn fill_cache<T: DeserializeOwned>(inner: &mut Inner<T>) -> Result<()> {
    let Some(handle) = inner.handle else {
        // No server handle means the initial batch was the entire result;
        // nothing further to fetch.
        inner.exhausted = true;
        return Ok(());
    };
    let params = json!([handle, inner.restriction.limit, inner.restriction.timelimit]);
    let batch: ExecuteQueryResult<T> = inner.engine.call("next-resultset-batch", params).await?;
    inner.cache.extend(batch.tuples);
    inner.exhausted = batch.exhausted;
    Ok(())
}

async fn dispose_locked<T>(inner: &mut Inner<T>) {
    if inner.disposed {
        return;
    }
    inner.disposed = true;
    if let Some(handle) = inner.handle {
        let params = json!([handle]);
        if let Err(e) = inner.engine.call::<serde_json::Value, _>("close-resultset", params).await
        {
            warn!(error = %e, handle, "failed to dispose result set on server");
        }
    }
}

impl<T> Drop for ResultSet<T> {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) != 1 {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let Ok(mut guard) = inner.try_lock() else { return };
        if guard.disposed {
            return;
        }
        let Some(handle) = guard.handle else {
            guard.disposed = true;
            return;
        };
        guard.disposed = true;
        let engine = Arc::clone(&guard.engine);
        drop(guard);
        tokio::spawn(async move {
            let params = json!([handle]);
            if let Err(e) =
                engine.call::<serde_json::Value, _>("close-resultset", params).await
            {
                warn!(error = %e, handle, "failed to dispose result set during drop");
            }
        });
    }
}
