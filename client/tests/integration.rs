//! End-to-end tests against an in-process mock TW server over loopback
//! TCP, the same harness shape as `tw-client-core`'s own
//! `end_to_end_call_and_notification_over_real_tcp` test: a real
//! `TcpListener`, a hand-written server task answering with
//! `FrameReader`/`FrameWriter::from_parts`, and the public `tw-client` API
//! driving the other end.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tw_client::{Client, ClientConfig, Schedule};
use tw_client_core::transport::{FrameReader, FrameWriter};
use tw_client_core::Envelope;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
struct Row {
    id: i64,
    name: String,
}

async fn connected_client() -> (Client, FrameReader, FrameWriter) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        (FrameReader::from_parts(read_half), FrameWriter::from_parts(write_half))
    });

    let client = Client::connect(ClientConfig::new("127.0.0.1", addr.port())).await.unwrap();
    let (server_reader, server_writer) = accept.await.unwrap();
    (client, server_reader, server_writer)
}

#[tokio::test]
async fn execute_query_returns_initial_batch_when_already_exhausted() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("execute-query"));
        let result = json!({
            "handle": null,
            "tuples": [{"id": 1, "name": "alpha"}, {"id": 2, "name": "beta"}],
            "exhausted": true,
            "signature": [{"name": "id", "type": "integer"}, {"name": "name", "type": "stringcase"}],
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), result)).await.unwrap();
    });

    let result_set = client
        .execute_query::<Row>("select * from t", "sql", None, None)
        .await
        .unwrap();

    assert!(result_set.move_next().await.unwrap());
    assert_eq!(result_set.cache_snapshot().await, vec![Row { id: 2, name: "beta".into() }]);
    assert!(result_set.move_next().await.unwrap());
    assert!(!result_set.move_next().await.unwrap());
    assert!(result_set.is_exhausted().await);

    server.await.unwrap();
}

#[tokio::test]
async fn result_set_fetches_additional_batches_until_exhausted() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("execute-query"));
        let first = json!({
            "handle": 42,
            "tuples": [{"id": 1, "name": "alpha"}],
            "exhausted": false,
            "signature": [{"name": "id", "type": "integer"}, {"name": "name", "type": "stringcase"}],
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), first)).await.unwrap();

        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("next-resultset-batch"));
        let second = json!({
            "handle": 42,
            "tuples": [{"id": 2, "name": "beta"}],
            "exhausted": true,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), second)).await.unwrap();
    });

    let result_set = client
        .execute_query::<Row>("select * from t", "sql", None, None)
        .await
        .unwrap();

    assert!(result_set.move_next().await.unwrap());
    assert_eq!(result_set.current().await, Some(Row { id: 1, name: "alpha".into() }));
    assert!(result_set.move_next().await.unwrap());
    assert_eq!(result_set.current().await, Some(Row { id: 2, name: "beta".into() }));
    assert!(!result_set.move_next().await.unwrap());
    assert_eq!(result_set.current().await, None);

    server.await.unwrap();
}

#[tokio::test]
async fn pull_collects_rows_and_stops_short_at_exhaustion() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("execute-query"));
        let result = json!({
            "handle": null,
            "tuples": [{"id": 1, "name": "alpha"}, {"id": 2, "name": "beta"}],
            "exhausted": true,
            "signature": [{"name": "id", "type": "integer"}, {"name": "name", "type": "stringcase"}],
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), result)).await.unwrap();
    });

    let result_set = client
        .execute_query::<Row>("select * from t", "sql", None, None)
        .await
        .unwrap();

    let pulled = result_set.pull(5).await.unwrap();
    assert_eq!(
        pulled,
        vec![Row { id: 1, name: "alpha".into() }, Row { id: 2, name: "beta".into() }]
    );
    assert!(!result_set.move_next().await.unwrap());

    server.await.unwrap();
}

#[tokio::test]
async fn prepared_query_rejects_wrong_parameter_type_for_sql() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 7,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [{"name": "id", "type": "integer"}],
            "usesNamedParameters": false,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();
    });

    let prepared = client.prepare_query::<Row>("select * from t where id = ?", "sql", None).await.unwrap();
    server.await.unwrap();

    let err = prepared.set_positional(0, json!("not-an-integer")).await.unwrap_err();
    assert!(matches!(err, tw_client::Error::ParamType { .. }));

    assert!(!prepared.fully_instantiated().await);
    prepared.set_positional(0, json!(5)).await.unwrap();
    assert!(prepared.fully_instantiated().await);
}

#[tokio::test]
async fn prepared_query_case_insensitive_named_lookup_and_execute() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 9,
            "inputSignature": {"names": ["Id"], "types": [["integer"]]},
            "outputSignature": [{"name": "id", "type": "integer"}],
            "usesNamedParameters": true,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();

        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("create-resultset"));
        let params = req.params.unwrap();
        assert_eq!(params["inputs"], json!([5]));
        let result = json!({
            "handle": null,
            "tuples": [{"id": 5, "name": "gamma"}],
            "exhausted": true,
            "signature": [{"name": "id", "type": "integer"}, {"name": "name", "type": "stringcase"}],
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), result)).await.unwrap();
    });

    let prepared = client.prepare_query::<Row>("select * from t where id = :id", "sql", None).await.unwrap();
    prepared.set_named("id", json!(5)).await.unwrap();
    let result_set = prepared.execute().await.unwrap();
    assert!(result_set.move_next().await.unwrap());

    server.await.unwrap();
}

#[tokio::test]
async fn unknown_named_parameter_is_rejected() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        let registration = json!({
            "handle": 11,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [],
            "usesNamedParameters": true,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();
    });

    let prepared = client.prepare_query::<Row>("q", "sql", None).await.unwrap();
    server.await.unwrap();

    let err = prepared.set_named("nope", json!(1)).await.unwrap_err();
    assert!(matches!(err, tw_client::Error::UnknownParam(_)));
}

#[tokio::test]
async fn try_clone_reprepares_with_a_fresh_handle_and_copies_slots() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 1,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [{"name": "id", "type": "integer"}],
            "usesNamedParameters": false,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();

        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 2,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [{"name": "id", "type": "integer"}],
            "usesNamedParameters": false,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();
    });

    let original = client.prepare_query::<Row>("select * from t where id = ?", "sql", None).await.unwrap();
    original.set_positional(0, json!(5)).await.unwrap();

    let clone = original.try_clone().await.unwrap();
    assert!(clone.fully_instantiated().await);

    server.await.unwrap();
}

#[tokio::test]
async fn polled_query_delivers_deltas_to_registered_handler() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("create-polled-query"));
        let method = req.params.unwrap()["method"].as_str().unwrap().to_owned();
        assert_eq!(method, "poll1");
        writer
            .write_message(&Envelope::success(req.id.unwrap(), json!({"handle": 3})))
            .await
            .unwrap();

        let delta = json!({
            "added": [{"id": 1, "name": "alpha"}],
            "deleted": [],
            "timestamp": "2026-01-01T00:00:00Z",
        });
        writer.write_message(&Envelope::notification("poll1", Some(delta))).await.unwrap();
        // Give the client's reader task a beat to dispatch before the
        // connection is torn down by dropping `writer`.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let schedule = Schedule::every(5).unwrap();
    let _polled = client
        .create_polled_query::<Row>(
            "select * from t",
            "sql",
            None,
            &schedule,
            tw_client::polled_query::PolledQueryOptions::default(),
            Some(std::sync::Arc::new(move |delta: tw_client::RowsDelta<Row>| {
                tx.send(delta.added).unwrap();
            })),
        )
        .await
        .unwrap();

    let added = rx.recv().await.unwrap();
    assert_eq!(added, vec![Row { id: 1, name: "alpha".into() }]);

    server.await.unwrap();
}

#[tokio::test]
async fn subscription_delivers_deltas_and_enforces_active_invariant() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("subscribe"));
        writer.write_message(&Envelope::success(req.id.unwrap(), Value::Null)).await.unwrap();

        let delta = json!({"added": [{"id": 9, "name": "z"}], "deleted": [], "timestamp": "2026-01-01T00:00:00Z"});
        writer.write_message(&Envelope::notification("sub1", Some(delta))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = client
        .create_subscription::<Row>("select * from t", "sql", None, move |delta: tw_client::RowsDelta<Row>| {
            tx.send(delta.added).unwrap();
        })
        .await
        .unwrap();

    assert!(subscription.is_active().await);
    let second_activate = subscription.subscribe().await;
    assert!(matches!(second_activate, Err(tw_client::Error::SubscriptionError(_))));

    let added = rx.recv().await.unwrap();
    assert_eq!(added, vec![Row { id: 9, name: "z".into() }]);

    server.await.unwrap();
}

#[tokio::test]
async fn batch_subscription_routes_coalesced_matches_to_members() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("subscribe"));
        writer.write_message(&Envelope::success(req.id.unwrap(), Value::Null)).await.unwrap();

        let notice = json!({
            "update#": 1,
            "matches": [{"label": "sub1", "tuples": [{"id": 4, "name": "w"}]}],
        });
        writer.write_message(&Envelope::notification("batch1", Some(notice))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    });

    let batch = client.create_batch_subscription().await.unwrap();

    // A batch member is an unactivated `Subscription` — `add_member`
    // activates it with `combine: true` on the caller's behalf, and its
    // deltas arrive coalesced under the batch's own label rather than the
    // member's.
    let member = std::sync::Arc::new(client.subscription_for_batch::<Row>("select * from t", "sql", None));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    batch
        .add_member(member, move |rows: Vec<Row>| {
            tx.send(rows).unwrap();
        })
        .await
        .unwrap();

    let rows = rx.recv().await.unwrap();
    assert_eq!(rows, vec![Row { id: 4, name: "w".into() }]);

    server.await.unwrap();
}

#[tokio::test]
async fn batch_subscription_rejects_member_from_a_different_client() {
    let (client_a, _reader_a, _writer_a) = connected_client().await;
    let (client_b, _reader_b, _writer_b) = connected_client().await;

    let batch = client_a.create_batch_subscription().await.unwrap();
    let foreign_member =
        std::sync::Arc::new(client_b.subscription_for_batch::<Row>("select * from t", "sql", None));

    let err = batch.add_member(foreign_member, |_rows: Vec<Row>| {}).await.unwrap_err();
    assert!(matches!(err, tw_client::Error::SubscriptionError(_)));
}

#[tokio::test]
async fn prepared_query_rejects_positional_set_on_named_query() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 13,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [],
            "usesNamedParameters": true,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();
    });

    let prepared = client.prepare_query::<Row>("select * from t where id = :id", "sql", None).await.unwrap();
    server.await.unwrap();

    let err = prepared.set_positional(0, json!(5)).await.unwrap_err();
    assert!(matches!(err, tw_client::Error::UnknownParam(_)));
}

#[tokio::test]
async fn prepared_query_rejects_named_set_on_positional_query() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("prepare-query"));
        let registration = json!({
            "handle": 14,
            "inputSignature": {"names": ["id"], "types": [["integer"]]},
            "outputSignature": [],
            "usesNamedParameters": false,
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), registration)).await.unwrap();
    });

    let prepared = client.prepare_query::<Row>("select * from t where id = ?", "sql", None).await.unwrap();
    server.await.unwrap();

    let err = prepared.set_named("id", json!(5)).await.unwrap_err();
    assert!(matches!(err, tw_client::Error::UnknownParam(_)));
}

#[tokio::test]
async fn result_set_disposes_and_reraises_on_a_failed_batch_fetch() {
    let (client, mut reader, mut writer) = connected_client().await;

    let server = tokio::spawn(async move {
        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("execute-query"));
        let result = json!({
            "handle": 42,
            "tuples": [{"id": 1, "name": "alpha"}],
            "exhausted": false,
            "signature": [{"name": "id", "type": "integer"}, {"name": "name", "type": "stringcase"}],
        });
        writer.write_message(&Envelope::success(req.id.unwrap(), result)).await.unwrap();

        let req = reader.read_next_message().await.unwrap().unwrap();
        assert_eq!(req.method.as_deref(), Some("next-resultset-batch"));
        let error = tw_client_core::RpcError {
            code: -32000,
            message: "server faulted mid-fetch".to_owned(),
            data: None,
        };
        writer.write_message(&Envelope::failure(req.id.unwrap(), error)).await.unwrap();
    });

    let result_set = client
        .execute_query::<Row>("select * from t", "sql", None, None)
        .await
        .unwrap();

    assert!(result_set.move_next().await.unwrap());
    let err = result_set.move_next().await.unwrap_err();
    assert!(matches!(err, tw_client::Error::ResultSetError(_)));

    // The result set is now disposed; further use keeps failing rather than
    // retrying the server.
    let err = result_set.move_next().await.unwrap_err();
    assert!(matches!(err, tw_client::Error::Disposed));

    server.await.unwrap();
}
