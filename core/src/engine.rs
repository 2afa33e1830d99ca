//! The RPC Engine: JSON-RPC 2.0 over the Frame Transport, for
//! both directions at once — outbound calls with response correlation,
//! outbound notifications, and inbound requests/notifications dispatched
//! through the [`MethodRegistry`].
//!
//! Modeled as two background tasks plus many caller tasks: one reader task drains the transport and dispatches inbound
//! messages, one writer task drains an outbound queue and owns the
//! `FrameWriter`, and `call`/`notify` hand work to the writer and (for
//! `call`) suspend on a `oneshot` until the reader delivers a matching
//! response. Divides responsibilities the way `jsonrpc-client-core::Client`
//! future and `ClientHandle` do, adapted from futures 0.1 polling to
//! `tokio` tasks and channels.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, warn};

use crate::error::{Error, Result};
use crate::message::{Envelope, RpcError};
use crate::registry::MethodRegistry;
use crate::transport::{self, FrameReader, FrameWriter};

const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// One outstanding `call`'s correlation-table entry: the sender half wakes
/// whichever task is awaiting the response.
type PendingCall = oneshot::Sender<std::result::Result<Value, RpcError>>;

struct Shared {
    registry: MethodRegistry,
    pending: DashMap<i64, PendingCall>,
    next_id: AtomicI64,
    started: AtomicBool,
    disconnected: AtomicBool,
    outbound_tx: mpsc::Sender<Envelope>,
}

/// The full-duplex JSON-RPC 2.0 engine. Cheap to clone: every clone shares
/// the same correlation table, registry, and outbound queue.
#[derive(Clone)]
pub struct RpcEngine {
    shared: Arc<Shared>,
}

impl RpcEngine {
    /// Builds an engine over an already-connected pair of transport halves.
    /// The reader/writer tasks are not spawned until [`RpcEngine::start`] is
    /// called.
    pub fn new(reader: FrameReader, writer: FrameWriter) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let shared = Arc::new(Shared {
            registry: MethodRegistry::new(),
            pending: DashMap::new(),
            next_id: AtomicI64::new(0),
            started: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            outbound_tx,
        });
        let engine = RpcEngine { shared };
        engine.spawn_workers(reader, writer, outbound_rx);
        engine
    }

    /// Opens a TCP connection and wraps it in an engine. Equivalent to
    /// `RpcEngine::new(transport::connect(host, port).await?)`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let (reader, writer) = transport::connect(host, port).await?;
        Ok(Self::new(reader, writer))
    }

    /// Like [`RpcEngine::connect`], but with an initial read-buffer
    /// capacity hint.
    pub async fn connect_with_capacity(host: &str, port: u16, initial_capacity: usize) -> Result<Self> {
        let (reader, writer) = transport::connect_with_capacity(host, port, initial_capacity).await?;
        Ok(Self::new(reader, writer))
    }

    fn spawn_workers(
        &self,
        reader: FrameReader,
        writer: FrameWriter,
        outbound_rx: mpsc::Receiver<Envelope>,
    ) {
        let writer_shared = Arc::clone(&self.shared);
        tokio::spawn(writer_task(writer_shared, writer, outbound_rx));

        let reader_shared = Arc::clone(&self.shared);
        tokio::spawn(reader_task(reader_shared, reader));
    }

    /// Spawns the reader/writer workers. Until this is called, `call` and
    /// `notify` fail with [`Error::NotStarted`].
    ///
    /// The workers are actually spawned eagerly in [`RpcEngine::new`] so the
    /// transport starts draining immediately; `start` exists to satisfy the
    /// documented "`call`/`notify` before `start` MUST fail" contract for
    /// callers that construct an engine and want to delay the first call.
    pub fn start(&self) {
        self.shared.started.store(true, Ordering::SeqCst);
    }

    fn ensure_startable(&self) -> Result<()> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(Error::disconnected("engine already torn down"));
        }
        Ok(())
    }

    /// Issues a request and awaits its correlated response, decoding the
    /// result into `T`.
    #[instrument(level = "debug", skip(self, params))]
    pub async fn call<T, P>(&self, method: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        self.ensure_startable()?;

        let params = serde_json::to_value(params)
            .map_err(|e| Error::InternalError(format!("failed to serialize params: {e}")))?;
        let params = match params {
            Value::Null => None,
            other => Some(other),
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        let envelope = Envelope::request(id, method, params);
        if self.shared.outbound_tx.send(envelope).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(Error::disconnected("writer task is gone"));
        }

        let outcome = rx.await.map_err(|_| {
            Error::disconnected("connection closed while call was outstanding")
        })?;

        match outcome {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| Error::InternalError(format!("failed to decode result: {e}"))),
            Err(rpc_error) => Err(Error::Remote {
                code: rpc_error.code,
                message: rpc_error.message,
                data: rpc_error.data,
            }),
        }
    }

    /// Sends a notification; never waits for (or expects) a response.
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<()> {
        self.ensure_startable()?;
        let params = serde_json::to_value(params)
            .map_err(|e| Error::InternalError(format!("failed to serialize params: {e}")))?;
        let params = match params {
            Value::Null => None,
            other => Some(other),
        };
        let envelope = Envelope::notification(method, params);
        self.shared
            .outbound_tx
            .send(envelope)
            .await
            .map_err(|_| Error::disconnected("writer task is gone"))
    }

    /// Registers a handler for inbound requests/notifications under `name`.
    /// Returns `false` if the name is already taken.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn crate::registry::MethodHandler>,
    ) -> bool {
        self.shared.registry.register(name, handler)
    }

    /// Removes the handler registered under `name`.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.shared.registry.unregister(name)
    }

    /// True once the transport has failed or been closed; every outstanding
    /// and future `call`/`notify` will fail.
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Explicitly tears down the engine: every outstanding call fails
    /// immediately and every future `call`/`notify` fails with
    /// [`Error::Disconnected`]. Idempotent.
    pub fn shutdown(&self) {
        teardown(&self.shared, "client requested shutdown");
    }
}

/// Drains the correlation table, waking every outstanding caller with
/// [`Error::Disconnected`].
fn teardown(shared: &Shared, reason: &str) {
    if shared.disconnected.swap(true, Ordering::SeqCst) {
        return;
    }
    error!(reason, "RPC engine tearing down");
    for (_, tx) in shared.pending.clone().into_iter() {
        let _ = tx.send(Err(RpcError {
            code: crate::error::CODE_SERVER_ERROR,
            message: format!("Connection to server lost: {reason}"),
            data: None,
        }));
    }
    shared.pending.clear();
}

async fn writer_task(
    shared: Arc<Shared>,
    mut writer: FrameWriter,
    mut outbound_rx: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = outbound_rx.recv().await {
        if let Err(e) = writer.write_message(&envelope).await {
            teardown(&shared, &e.to_string());
            break;
        }
    }
    writer.close().await;
}

async fn reader_task(shared: Arc<Shared>, mut reader: FrameReader) {
    loop {
        match reader.read_next_message().await {
            Ok(Some(envelope)) => dispatch_inbound(&shared, envelope).await,
            Ok(None) => {
                teardown(&shared, "peer closed the connection");
                break;
            }
            Err(e) => {
                teardown(&shared, &e.to_string());
                break;
            }
        }
    }
}

async fn dispatch_inbound(shared: &Arc<Shared>, envelope: Envelope) {
    if envelope.is_response() {
        handle_response(shared, envelope);
        return;
    }

    let method = match &envelope.method {
        Some(m) => m.clone(),
        None => {
            warn!("dropping structurally invalid message (no method, not a response)");
            return;
        }
    };

    if let Some(id) = envelope.id {
        // Request: always answer, even on failure.
        let result = shared.registry.dispatch(&method, envelope.params).await;
        let response = match result {
            Ok(value) => Envelope::success(id, value),
            Err(e) => Envelope::failure(
                id,
                RpcError { code: e.code(), message: e.to_string(), data: None },
            ),
        };
        if shared.outbound_tx.send(response).await.is_err() {
            warn!(method, "failed to queue response: writer task is gone");
        }
    } else {
        // Notification: swallow and log any handler error.
        if let Err(e) = shared.registry.dispatch(&method, envelope.params).await {
            warn!(method, error = %e, "notification handler failed");
        }
    }
}

fn handle_response(shared: &Arc<Shared>, envelope: Envelope) {
    let Some(id) = envelope.id else {
        warn!("dropping response with no id");
        return;
    };
    let Some((_, tx)) = shared.pending.remove(&id) else {
        debug!(id, "dropping response with an unknown or already-resolved id");
        return;
    };
    let outcome = match envelope.error {
        Some(rpc_error) => Err(rpc_error),
        None => Ok(envelope.result.unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BoxFuture, FnHandler};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn fresh_shared(outbound_tx: mpsc::Sender<Envelope>) -> Shared {
        Shared {
            registry: MethodRegistry::new(),
            pending: DashMap::new(),
            next_id: AtomicI64::new(0),
            started: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            outbound_tx,
        }
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_drains_pending() {
        let shared = fresh_shared(mpsc::channel(1).0);
        let (done_tx, done_rx) = oneshot::channel();
        shared.pending.insert(0, done_tx);

        teardown(&shared, "socket closed");
        teardown(&shared, "socket closed again");

        assert!(shared.pending.is_empty());
        let outcome = done_rx.await.unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn dispatch_unknown_request_replies_with_method_not_found() {
        let (tx, mut rx) = mpsc::channel(8);
        let shared = Arc::new(fresh_shared(tx));
        dispatch_inbound(&shared, Envelope::request(0, "missing", None)).await;
        let response = rx.recv().await.unwrap();
        assert_eq!(response.error.unwrap().code, crate::error::CODE_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_known_request_replies_with_success() {
        let (tx, mut rx) = mpsc::channel(8);
        let shared = Arc::new(fresh_shared(tx));
        shared.registry.register(
            "echo",
            Arc::new(FnHandler(|params: Option<Value>| {
                Box::pin(async move { Ok(params.unwrap_or(Value::Null)) })
                    as BoxFuture<Result<Value>>
            })),
        );
        dispatch_inbound(&shared, Envelope::request(5, "echo", Some(json!(7)))).await;
        let response = rx.recv().await.unwrap();
        assert_eq!(response.id, Some(5));
        assert_eq!(response.result, Some(json!(7)));
    }

    #[tokio::test]
    async fn response_with_unknown_id_is_dropped_without_panicking() {
        let shared = Arc::new(fresh_shared(mpsc::channel(8).0));
        handle_response(&shared, Envelope::success(123, Value::Null));
        assert!(shared.pending.is_empty());
    }

    #[tokio::test]
    async fn end_to_end_call_and_notification_over_real_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream.set_nodelay(true).ok();
            let (read_half, write_half) = stream.into_split();
            let mut reader = crate::transport::FrameReader::from_parts(read_half);
            let mut writer = crate::transport::FrameWriter::from_parts(write_half);

            // "noop" request -> null result.
            let req = reader.read_next_message().await.unwrap().unwrap();
            assert_eq!(req.method.as_deref(), Some("noop"));
            writer.write_message(&Envelope::success(req.id.unwrap(), Value::Null)).await.unwrap();

            // a notification, which expects no reply.
            let notif = reader.read_next_message().await.unwrap().unwrap();
            assert!(notif.is_notification());
        });

        let engine = RpcEngine::connect("127.0.0.1", addr.port()).await.unwrap();
        engine.start();

        let result: Value = engine.call("noop", Some(json!([]))).await.unwrap();
        assert_eq!(result, Value::Null);

        engine.notify("ping", json!([])).await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_during_call_fails_with_server_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Accept the connection, read nothing, then drop it immediately.
            drop(stream);
        });

        let engine = RpcEngine::connect("127.0.0.1", addr.port()).await.unwrap();
        engine.start();

        let outcome: Result<Value> = engine.call("noop", Some(json!([]))).await;
        assert!(matches!(outcome, Err(Error::Disconnected(_))));

        server.await.unwrap();
    }
}
