//! `PolledQuery<T>`: a query the server re-evaluates on a [`Schedule`],
//! reporting each change as a [`RowsDelta`](crate::types::RowsDelta)
//! notification under a client-reserved label. `poll()` additionally lets
//! the caller force an immediate re-evaluation outside the schedule.
//!
//! Notification delivery itself lives in the method registry the owning
//! `Client` installed at construction; a `PolledQuery` only owns the handle
//! and the client-side bookkeeping needed to issue `poll-now`/
//! `close-polled-query`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;
use tw_client_core::RpcEngine;

use crate::error::{Error, Result};
use crate::schedule::Schedule;
use crate::types::PolledQueryRegistration;

/// Optional flags controlling how a [`PolledQuery`] reports its results,
/// passed through to `create-polled-query` unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolledQueryOptions {
    /// Report the first evaluation even if it finds nothing new.
    pub report_initial: Option<bool>,
    /// Report an evaluation even when it detects no change.
    pub report_unchanged: Option<bool>,
    /// Delay the first scheduled evaluation rather than running one
    /// immediately on registration.
    pub delay_schedule: Option<bool>,
}

/// A server-scheduled, repeatedly-evaluated query delivering row deltas by
/// notification under `label`.
pub struct PolledQuery<T> {
    engine: Arc<RpcEngine>,
    handle: i64,
    label: String,
    disposed: AtomicBool,
    _row: PhantomData<fn() -> T>,
}

impl<T> PolledQuery<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) async fn create(
        engine: Arc<RpcEngine>,
        label: String,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        schedule: &Schedule,
        options: PolledQueryOptions,
    ) -> Result<Self> {
        let params = json!({
            "query": query.into(),
            "language": language.into(),
            "namespace": namespace,
            "method": label,
            "schedule": schedule,
            "report-initial": options.report_initial,
            "report-unchanged": options.report_unchanged,
            "delay-schedule": options.delay_schedule,
        });
        let registration: PolledQueryRegistration =
            engine.call("create-polled-query", params).await?;
        Ok(PolledQuery {
            engine,
            handle: registration.handle,
            label,
            disposed: AtomicBool::new(false),
            _row: PhantomData,
        })
    }

    /// The notification label this polled query reports deltas under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Forces an immediate re-evaluation, ahead of the next scheduled one.
    /// The resulting delta still arrives as a notification, not as this
    /// call's return value.
    pub async fn poll(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        let params = json!([self.handle, Value::Null]);
        self.engine.call::<Value, _>("poll-now", params).await?;
        Ok(())
    }

    /// Releases the server-side polled query and unregisters its
    /// notification label, so any notification that arrives for it
    /// afterwards (a race with the server) is silently dropped rather than
    /// routed here. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.disposed.store(true, Ordering::SeqCst);
        self.engine.unregister_method(&self.label);
        let params = json!([self.handle]);
        self.engine.call::<Value, _>("close-polled-query", params).await?;
        Ok(())
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(())
    }
}

impl<T> Drop for PolledQuery<T> {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.unregister_method(&self.label);
        let engine = Arc::clone(&self.engine);
        let handle = self.handle;
        tokio::spawn(async move {
            let params = json!([handle]);
            if let Err(e) = engine.call::<Value, _>("close-polled-query", params).await {
                warn!(error = %e, handle, "failed to dispose polled query during drop");
            }
        });
    }
}
