//! `BatchSubscription`: a group of subscriptions whose notifications the
//! server coalesces into a single `{update#, matches: [{label, tuples}]}`
//! payload delivered under the batch's own label, instead of one
//! notification per member.
//!
//! The member table is a [`DashMap`], the same concurrent-map grounding
//! `tw_client_core::registry::MethodRegistry` uses for its handler table —
//! lookups and removals never need to hold a lock across an `.await`.
//! Type erasure over each member's row type uses the same
//! `Pin<Box<dyn Future<...> + Send>>` approach as
//! [`tw_client_core::registry::MethodHandler`] rather than pulling in
//! `async-trait`, so a heterogeneous member table can still dispatch
//! through one non-generic interface.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;
use tw_client_core::BoxFuture;
use tw_client_core::RpcEngine;

use crate::error::{Error, Result};
use crate::subscription::Subscription;
use crate::types::BatchNotice;

/// A member of a batch, able to receive its raw coalesced tuples and
/// release itself without the batch needing to know its row type.
trait BatchMember: Send + Sync {
    fn join_batch(&self, method: String) -> BoxFuture<Result<()>>;
    fn leave_batch(&self) -> BoxFuture<Result<()>>;
    fn dispatch(&self, tuples: Vec<Value>) -> BoxFuture<()>;
}

struct TypedMember<T> {
    subscription: Arc<Subscription<T>>,
    on_match: Arc<dyn Fn(Vec<T>) + Send + Sync>,
}

impl<T> BatchMember for TypedMember<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn join_batch(&self, method: String) -> BoxFuture<Result<()>> {
        let sub = Arc::clone(&self.subscription);
        Box::pin(async move { sub.join_batch(&method).await })
    }

    fn leave_batch(&self) -> BoxFuture<Result<()>> {
        let sub = Arc::clone(&self.subscription);
        Box::pin(async move { sub.leave_batch().await })
    }

    fn dispatch(&self, tuples: Vec<Value>) -> BoxFuture<()> {
        let on_match = Arc::clone(&self.on_match);
        let label = self.subscription.label().to_owned();
        Box::pin(async move {
            let mut rows = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                match serde_json::from_value::<T>(tuple) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        warn!(error = %e, %label, "dropping malformed tuple in batch notification");
                    }
                }
            }
            (on_match)(rows);
        })
    }
}

/// A server-coalesced group of subscriptions, reporting all members'
/// changes under one notification label.
pub struct BatchSubscription {
    engine: Arc<RpcEngine>,
    label: String,
    members: DashMap<String, Arc<dyn BatchMember>>,
}

impl BatchSubscription {
    pub(crate) fn new(engine: Arc<RpcEngine>, label: String) -> Self {
        BatchSubscription { engine, label, members: DashMap::new() }
    }

    /// The notification label this batch reports coalesced deltas under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Adds `subscription` as a member of this batch and activates it with
    /// `method` set to this batch's own label and `combine: true`.
    /// `on_match` is invoked with each coalesced delta's decoded rows
    /// whenever a notification names this member's label.
    pub async fn add_member<T>(
        &self,
        subscription: Arc<Subscription<T>>,
        on_match: impl Fn(Vec<T>) + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let member_label = subscription.label().to_owned();
        if !Arc::ptr_eq(subscription.engine(), &self.engine) {
            return Err(Error::SubscriptionError(format!(
                "`{member_label}` belongs to a different client than batch `{}`",
                self.label
            )));
        }
        if self.members.contains_key(&member_label) {
            return Err(Error::SubscriptionError(format!(
                "`{member_label}` is already a member of batch `{}`",
                self.label
            )));
        }
        subscription.join_batch(&self.label).await?;

        let member: Arc<dyn BatchMember> =
            Arc::new(TypedMember { subscription, on_match: Arc::new(on_match) });
        self.members.insert(member_label, member);
        Ok(())
    }

    /// Removes and deactivates a member.
    pub async fn remove_member(&self, label: &str) -> Result<()> {
        let (_, member) = self
            .members
            .remove(label)
            .ok_or_else(|| Error::SubscriptionError(format!("no such batch member `{label}`")))?;
        member.leave_batch().await
    }

    /// Routes a coalesced `{update#, matches}` notification to its member
    /// subscriptions. Unknown member labels are logged and skipped — the
    /// batch may have been told to drop a member the server hasn't caught
    /// up to yet.
    pub(crate) async fn dispatch(&self, notice: BatchNotice) {
        for m in notice.matches {
            let member = self.members.get(&m.label).map(|entry| Arc::clone(entry.value()));
            match member {
                Some(member) => member.dispatch(m.tuples).await,
                None => {
                    warn!(label = %m.label, batch = %self.label, "notification for unknown batch member")
                }
            }
        }
    }

    /// Unregisters this batch's own notification handler, then releases
    /// every member sequentially. The server provides no atomic
    /// multi-unsubscribe, so a transaction firing mid-disposal may still
    /// produce a partial batch notification for members not yet removed;
    /// unregistering the handler first means any such notification is
    /// simply dropped rather than routed to a half-torn-down batch.
    pub async fn dispose(&self) -> Result<()> {
        self.engine.unregister_method(&self.label);
        let labels: Vec<String> = self.members.iter().map(|entry| entry.key().clone()).collect();
        for label in labels {
            if let Err(e) = self.remove_member(&label).await {
                warn!(error = %e, %label, "failed to unsubscribe batch member during dispose");
            }
        }
        Ok(())
    }
}

impl Drop for BatchSubscription {
    fn drop(&mut self) {
        self.engine.unregister_method(&self.label);
        if self.members.is_empty() {
            return;
        }
        let members: Vec<Arc<dyn BatchMember>> =
            self.members.iter().map(|entry| Arc::clone(entry.value())).collect();
        let label = self.label.clone();
        tokio::spawn(async move {
            for member in members {
                if let Err(e) = member.leave_batch().await {
                    warn!(error = %e, batch = %label, "failed to unsubscribe batch member during drop");
                }
            }
        });
    }
}
