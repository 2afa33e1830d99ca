//! `Client`: the facade applications construct. Owns the connection, the
//! default row/time-limit restriction every object inherits, and the
//! per-client label counters (`poll1`, `sub1`, `batch1`, ...) used to
//! reserve notification method names for polled queries, subscriptions,
//! and batch subscriptions. These counters are scoped to the `Client`
//! instance, not process-global, so two clients in the same process never
//! collide on a label.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;
use tw_client_core::{BoxFuture, FnHandler, RpcEngine};

use crate::batch_subscription::BatchSubscription;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::polled_query::{PolledQuery, PolledQueryOptions};
use crate::prepared_query::PreparedQuery;
use crate::result_set::ResultSet;
use crate::schedule::Schedule;
use crate::subscription::Subscription;
use crate::types::{PolledQueryErrorNotice, RelData, Restriction, RowsDelta, TwRuntimeMeasure};
use crate::view::View;

/// The top-level handle applications hold: one TW server connection plus
/// everything needed to build and track query objects over it.
pub struct Client {
    engine: Arc<RpcEngine>,
    config: ClientConfig,
    poll_counter: AtomicU64,
    sub_counter: AtomicU64,
    batch_counter: AtomicU64,
}

impl Client {
    /// Connects to the server described by `config` and starts the engine.
    /// Fails with [`tw_client_core::Error::Disconnected`] if the TCP
    /// connect itself doesn't complete within `config.connect_timeout`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connect = RpcEngine::connect_with_capacity(
            &config.host,
            config.port,
            config.read_buffer_initial_capacity,
        );
        let engine = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| {
                tw_client_core::Error::Disconnected(Some(format!(
                    "connect to {}:{} timed out after {:?}",
                    config.host, config.port, config.connect_timeout
                )))
            })??;
        engine.start();
        Ok(Client {
            engine: Arc::new(engine),
            config,
            poll_counter: AtomicU64::new(0),
            sub_counter: AtomicU64::new(0),
            batch_counter: AtomicU64::new(0),
        })
    }

    /// Wraps an already-connected, already-started engine. Mainly useful
    /// for tests that want to stand up the engine against a mock server
    /// themselves.
    pub fn from_engine(engine: RpcEngine, config: ClientConfig) -> Self {
        Client {
            engine: Arc::new(engine),
            config,
            poll_counter: AtomicU64::new(0),
            sub_counter: AtomicU64::new(0),
            batch_counter: AtomicU64::new(0),
        }
    }

    fn reserve_label(prefix: &str, counter: &AtomicU64) -> String {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}{n}")
    }

    /// A stateless, re-executable query description.
    pub fn view<T>(&self, query: impl Into<String>, language: impl Into<String>, namespace: Option<String>) -> View<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        View::new(
            Arc::clone(&self.engine),
            query,
            language,
            namespace,
            self.config.default_restriction,
        )
    }

    /// Executes `query` once, returning a fresh cursor over its rows.
    /// Equivalent to `self.view(...).execute(restriction)`.
    pub async fn execute_query<T>(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        restriction: Option<Restriction>,
    ) -> Result<ResultSet<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.view(query, language, namespace).execute(restriction).await
    }

    /// Registers `query` on the server for repeated parameterized
    /// execution.
    pub async fn prepare_query<T>(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
    ) -> Result<PreparedQuery<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        PreparedQuery::prepare(
            Arc::clone(&self.engine),
            query,
            language,
            namespace,
            self.config.default_restriction,
        )
        .await
    }

    /// Registers `query` to be periodically re-evaluated on `schedule`.
    /// `on_delta` is invoked for every reported row change; if `None`, a
    /// change is logged and otherwise ignored.
    pub async fn create_polled_query<T>(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        schedule: &Schedule,
        options: PolledQueryOptions,
        on_delta: Option<Arc<dyn Fn(RowsDelta<T>) + Send + Sync>>,
    ) -> Result<PolledQuery<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let label = Self::reserve_label("poll", &self.poll_counter);
        self.engine.register_method(
            label.clone(),
            Arc::new(FnHandler(move |params: Option<Value>| {
                let on_delta = on_delta.clone();
                Box::pin(async move {
                    let value = params.unwrap_or(Value::Null);
                    match serde_json::from_value::<RowsDelta<T>>(value.clone()) {
                        Ok(delta) => match &on_delta {
                            Some(cb) => cb(delta),
                            None => tracing::info!(
                                added = delta.added.len(),
                                deleted = delta.deleted.len(),
                                "polled query delta (no handler registered)"
                            ),
                        },
                        Err(_) => match serde_json::from_value::<PolledQueryErrorNotice>(value) {
                            Ok(notice) => {
                                warn!(message = %notice.message, "polled query reported an error")
                            }
                            Err(e) => {
                                warn!(error = %e, "unrecognized polled query notification payload")
                            }
                        },
                    }
                    Ok(Value::Null)
                }) as BoxFuture<tw_client_core::Result<Value>>
            })),
        );
        PolledQuery::create(Arc::clone(&self.engine), label, query, language, namespace, schedule, options)
            .await
    }

    /// Activates a standing subscription to `query`'s row changes,
    /// invoking `on_delta` for every reported change.
    pub async fn create_subscription<T>(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
        on_delta: impl Fn(RowsDelta<T>) + Send + Sync + 'static,
    ) -> Result<Arc<Subscription<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let label = Self::reserve_label("sub", &self.sub_counter);
        let on_delta: Arc<dyn Fn(RowsDelta<T>) + Send + Sync> = Arc::new(on_delta);
        let subscription =
            Arc::new(Subscription::new(Arc::clone(&self.engine), label.clone(), query, language, namespace));

        self.engine.register_method(
            label.clone(),
            Arc::new(FnHandler(move |params: Option<Value>| {
                let on_delta = Arc::clone(&on_delta);
                Box::pin(async move {
                    let value = params.unwrap_or(Value::Null);
                    match serde_json::from_value::<RowsDelta<T>>(value) {
                        Ok(delta) => on_delta(delta),
                        Err(e) => warn!(error = %e, "malformed subscription notification"),
                    }
                    Ok(Value::Null)
                }) as BoxFuture<tw_client_core::Result<Value>>
            })),
        );

        subscription.subscribe().await?;
        Ok(subscription)
    }

    /// Builds an unactivated subscription meant to be joined to a
    /// [`BatchSubscription`] via [`BatchSubscription::add_member`], rather
    /// than activated standalone. A batch member's notifications arrive
    /// coalesced under the batch's own label, never under the member's, so
    /// unlike [`Client::create_subscription`] this reserves a label
    /// without registering a handler for it.
    pub fn subscription_for_batch<T>(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
    ) -> Subscription<T>
    where
        T: Send + 'static,
    {
        let label = Self::reserve_label("sub", &self.sub_counter);
        Subscription::new(Arc::clone(&self.engine), label, query, language, namespace)
    }

    /// Creates an empty batch subscription; members are added with
    /// [`BatchSubscription::add_member`].
    pub async fn create_batch_subscription(&self) -> Result<Arc<BatchSubscription>> {
        let label = Self::reserve_label("batch", &self.batch_counter);
        let batch = Arc::new(BatchSubscription::new(Arc::clone(&self.engine), label.clone()));
        let batch_for_handler = Arc::clone(&batch);

        self.engine.register_method(
            label,
            Arc::new(FnHandler(move |params: Option<Value>| {
                let batch = Arc::clone(&batch_for_handler);
                Box::pin(async move {
                    let value = params.unwrap_or(Value::Null);
                    match serde_json::from_value(value) {
                        Ok(notice) => batch.dispatch(notice).await,
                        Err(e) => warn!(error = %e, "malformed batch subscription notification"),
                    }
                    Ok(Value::Null)
                }) as BoxFuture<tw_client_core::Result<Value>>
            })),
        );

        Ok(batch)
    }

    /// A round-trip liveness check; the server echoes it back with no
    /// side effects.
    pub async fn noop(&self) -> Result<()> {
        self.engine.call::<Value, _>("noop", json!([])).await?;
        Ok(())
    }

    /// Asks the server whether `query` is well-formed, without executing
    /// it. Returns `Ok(())` if valid. A server-reported rejection of the
    /// query itself surfaces as [`crate::error::Error::InvalidQuery`];
    /// an internal decode failure or a lost connection propagates
    /// unchanged as [`crate::error::Error::Rpc`] instead, since those
    /// aren't judgments about the query text.
    pub async fn validate_query(
        &self,
        query: impl Into<String>,
        language: impl Into<String>,
        namespace: Option<String>,
    ) -> Result<()> {
        let params = json!([query.into(), language.into(), namespace]);
        match self.engine.call::<String, _>("validate", params).await {
            Ok(_) => Ok(()),
            Err(e @ tw_client_core::Error::InternalError(_))
            | Err(e @ tw_client_core::Error::Disconnected(_)) => Err(crate::error::Error::Rpc(e)),
            Err(e) => Err(crate::error::Error::InvalidQuery(e.to_string())),
        }
    }

    /// Fetches the server's last-reported runtime/GC-time/bytes measure.
    pub async fn get_runtime_measure(&self) -> Result<TwRuntimeMeasure> {
        Ok(self.engine.call("runtime", json!([])).await?)
    }

    /// Fetches the server's relation catalog.
    pub async fn get_rel_data(&self) -> Result<RelData> {
        Ok(self.engine.call("reldata2017", json!([])).await?)
    }

    /// Explicitly tears down the connection. Idempotent; safe to call more
    /// than once. After this returns, every outstanding and future
    /// operation on objects produced by this client fails with
    /// [`tw_client_core::Error::Disconnected`].
    pub fn close(&self) {
        self.engine.shutdown();
    }
}
