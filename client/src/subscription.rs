//! `Subscription<T>`: a live, standing subscription to a query's row
//! changes, delivered as [`RowsDelta`](crate::types::RowsDelta)
//! notifications under a client-reserved label.
//!
//! A subscription is either standalone-active (subscribed directly) or a
//! member of exactly one [`BatchSubscription`](crate::batch_subscription::BatchSubscription),
//! never both at once. `subscribe`/`unsubscribe` always carry both `label`
//! (this subscription's own identity, used to tag entries in a batch's
//! coalesced `matches`) and `method` (the routing target the server should
//! notify): standalone, `method` equals `label` itself; as a batch member,
//! `method` equals the owning batch's label instead. `unsubscribe` must
//! resend the same `method`/`combine` pair used to activate, so both are
//! retained in the activation state rather than recomputed.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;
use tw_client_core::RpcEngine;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Activation {
    Idle,
    Active { method: String, combine: bool },
    InBatch { method: String, combine: bool },
}

/// A standing subscription to a query's row changes.
pub struct Subscription<T> {
    engine: Arc<RpcEngine>,
    label: String,
    query: String,
    language: String,
    namespace: Option<String>,
    activation: Mutex<Activation>,
    _row: PhantomData<fn() -> T>,
}

impl<T> Subscription<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        engine: Arc<RpcEngine>,
        label: String,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
    ) -> Self {
        Subscription {
            engine,
            label,
            query: query.into(),
            language: language.into(),
            namespace,
            activation: Mutex::new(Activation::Idle),
            _row: PhantomData,
        }
    }

    /// The notification label this subscription reports deltas under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The engine this subscription is bound to, used by
    /// [`crate::batch_subscription::BatchSubscription::add_member`] to
    /// reject joining a subscription from a different client.
    pub(crate) fn engine(&self) -> &Arc<RpcEngine> {
        &self.engine
    }

    /// Activates the subscription directly (not as part of a batch). Fails
    /// if it's already active or currently a batch member.
    pub async fn subscribe(&self) -> Result<()> {
        let mut activation = self.activation.lock().await;
        self.ensure_idle(&activation)?;
        let method = self.label.clone();
        self.send_subscribe(&method, false).await?;
        *activation = Activation::Active { method, combine: false };
        Ok(())
    }

    /// Deactivates a standalone-active subscription, resending the
    /// `method`/`combine` pair used at activation time and unregistering
    /// the notification handler installed under this subscription's label.
    pub async fn unsubscribe(&self) -> Result<()> {
        let mut activation = self.activation.lock().await;
        let Activation::Active { method, combine } = &*activation else {
            return Err(Error::SubscriptionError(format!(
                "subscription `{}` is not active",
                self.label
            )));
        };
        self.send_unsubscribe(method, *combine).await?;
        self.engine.unregister_method(&self.label);
        *activation = Activation::Idle;
        Ok(())
    }

    /// Whether this subscription is currently standalone-active.
    pub async fn is_active(&self) -> bool {
        matches!(&*self.activation.lock().await, Activation::Active { .. })
    }

    /// Joins a batch whose own label is `method`, activating with
    /// `combine: true`. Called by [`crate::batch_subscription::BatchSubscription::add_member`].
    pub(crate) async fn join_batch(&self, method: &str) -> Result<()> {
        let mut activation = self.activation.lock().await;
        self.ensure_idle(&activation)?;
        self.send_subscribe(method, true).await?;
        *activation = Activation::InBatch { method: method.to_owned(), combine: true };
        Ok(())
    }

    /// Leaves the batch it's a member of, resending the same `method`/
    /// `combine` used to join. No-op if not currently in a batch.
    pub(crate) async fn leave_batch(&self) -> Result<()> {
        let mut activation = self.activation.lock().await;
        let Activation::InBatch { method, combine } = &*activation else {
            return Ok(());
        };
        self.send_unsubscribe(method, *combine).await?;
        *activation = Activation::Idle;
        Ok(())
    }

    fn ensure_idle(&self, activation: &Activation) -> Result<()> {
        match activation {
            Activation::Active { .. } => Err(Error::SubscriptionError(format!(
                "subscription `{}` is already active",
                self.label
            ))),
            Activation::InBatch { .. } => Err(Error::SubscriptionError(format!(
                "subscription `{}` is a member of a batch subscription",
                self.label
            ))),
            Activation::Idle => Ok(()),
        }
    }

    async fn send_subscribe(&self, method: &str, combine: bool) -> Result<()> {
        let params = json!({
            "query": self.query,
            "language": self.language,
            "namespace": self.namespace,
            "label": self.label,
            "method": method,
            "combine": combine,
        });
        self.engine.call::<Value, _>("subscribe", params).await?;
        Ok(())
    }

    async fn send_unsubscribe(&self, method: &str, combine: bool) -> Result<()> {
        let params = json!({
            "query": self.query,
            "language": self.language,
            "namespace": self.namespace,
            "label": self.label,
            "method": method,
            "combine": combine,
        });
        self.engine.call::<Value, _>("unsubscribe", params).await?;
        Ok(())
    }

    /// The query text this subscription watches.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The query language (`"sql"` or `"fol"`).
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The namespace the query was registered against, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Ok(activation) = self.activation.try_lock() else { return };
        let (method, combine) = match &*activation {
            Activation::Active { method, combine } => (method.clone(), *combine),
            Activation::InBatch { .. } | Activation::Idle => return,
        };
        drop(activation);
        self.engine.unregister_method(&self.label);
        let engine = Arc::clone(&self.engine);
        let label = self.label.clone();
        let query = self.query.clone();
        let language = self.language.clone();
        let namespace = self.namespace.clone();
        tokio::spawn(async move {
            let params = json!({
                "query": query,
                "language": language,
                "namespace": namespace,
                "label": label,
                "method": method,
                "combine": combine,
            });
            if let Err(e) = engine.call::<Value, _>("unsubscribe", params).await {
                warn!(error = %e, %label, "failed to unsubscribe during drop");
            }
        });
    }
}
