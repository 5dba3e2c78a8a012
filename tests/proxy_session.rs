//! End-to-end tests: real sockets, a mock upstream, and a recording sink.

use std::time::Duration;

use bson::doc;
use tokio::io::AsyncWriteExt;

use mongo_audit_proxy::wire::{OpCode, OperationKind};

mod common;

use common::{op_msg, raw_message, read_n, start_proxy};

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn forwards_bytes_unchanged_in_both_directions() {
    let upstream = common::start_echo_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    let mut stream = Vec::new();
    stream.extend(op_msg(1, 0, &doc! { "hello": 1, "$db": "admin" }));
    stream.extend(raw_message(2, 0, OpCode::Query.as_i32(), b"legacy query payload"));
    stream.extend(op_msg(3, 0, &doc! { "insert": "users", "$db": "app", "documents": [{ "_id": 1 }] }));

    // Deliberately split mid-header and mid-body.
    for piece in [&stream[..7], &stream[7..40], &stream[40..]] {
        client.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let echoed = read_n(&mut client, stream.len()).await;
    assert_eq!(echoed, stream);
}

#[tokio::test]
async fn insert_is_audited_exactly_once() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    let command = doc! { "insert": "users", "$db": "app", "documents": [{ "_id": 5, "name": "ada" }] };
    let request = op_msg(5, 0, &command);
    client.write_all(&request).await.unwrap();

    let reply_len = op_msg(0, 0, &doc! { "n": 1, "ok": 1.0 }).len();
    let reply = read_n(&mut client, reply_len).await;
    assert_eq!(common::body_of(&reply), doc! { "n": 1, "ok": 1.0 });

    let records = proxy.sink.wait_for(1, WAIT).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.request_id, 5);
    assert_eq!(record.info.kind, OperationKind::Insert);
    assert_eq!(record.info.database, "app");
    assert_eq!(record.info.collection, "users");
    assert_eq!(record.request, command);
    assert_eq!(record.response, doc! { "n": 1, "ok": 1.0 });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(proxy.sink.records().len(), 1);
}

#[tokio::test]
async fn every_write_kind_is_audited() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    let commands = [
        doc! { "insert": "c", "$db": "d", "documents": [{ "_id": 1 }] },
        doc! { "update": "c", "$db": "d", "updates": [{ "q": { "_id": 1 }, "u": { "$set": { "x": 1 } } }] },
        doc! { "delete": "c", "$db": "d", "deletes": [{ "q": { "_id": 1 }, "limit": 1 }] },
        doc! { "findAndModify": "c", "$db": "d", "query": { "_id": 1 }, "remove": true },
    ];

    let mut pipelined = Vec::new();
    for (i, command) in commands.iter().enumerate() {
        pipelined.extend(op_msg(10 + i as i32, 0, command));
    }
    client.write_all(&pipelined).await.unwrap();

    let records = proxy.sink.wait_for(4, WAIT).await;
    let mut kinds: Vec<_> = records.iter().map(|r| (r.request_id, r.info.kind)).collect();
    kinds.sort_by_key(|(id, _)| *id);
    assert_eq!(
        kinds,
        vec![
            (10, OperationKind::Insert),
            (11, OperationKind::Update),
            (12, OperationKind::Delete),
            (13, OperationKind::FindAndModify),
        ]
    );
}

#[tokio::test]
async fn find_and_modify_with_update_document_is_audited() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    let command = doc! {
        "findAndModify": "users",
        "query": { "_id": 5 },
        "update": { "$set": { "name": "grace" } },
        "new": true,
        "$db": "app",
    };
    client.write_all(&op_msg(21, 0, &command)).await.unwrap();

    let records = proxy.sink.wait_for(1, WAIT).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request_id, 21);
    assert_eq!(records[0].info.kind, OperationKind::FindAndModify);
    assert_eq!(records[0].info.namespace(), "app.users");
    assert_eq!(records[0].request, command);
}

#[tokio::test]
async fn reads_are_forwarded_but_not_audited() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    client
        .write_all(&op_msg(1, 0, &doc! { "find": "users", "$db": "app", "filter": {} }))
        .await
        .unwrap();
    let reply_len = op_msg(0, 0, &doc! { "n": 1, "ok": 1.0 }).len();
    read_n(&mut client, reply_len).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(proxy.sink.records().is_empty());
}

#[tokio::test]
async fn response_to_unknown_request_is_not_audited() {
    let upstream = common::start_mongo_upstream(|_, _| Some((999, doc! { "n": 1, "ok": 1.0 }))).await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    client
        .write_all(&op_msg(5, 0, &doc! { "insert": "users", "$db": "app", "documents": [{ "_id": 5 }] }))
        .await
        .unwrap();
    let reply_len = op_msg(0, 0, &doc! { "n": 1, "ok": 1.0 }).len();
    let reply = read_n(&mut client, reply_len).await;
    assert_eq!(i32::from_le_bytes(reply[8..12].try_into().unwrap()), 999);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(proxy.sink.records().is_empty());
}

#[tokio::test]
async fn legacy_opcodes_pass_through_unaudited() {
    let upstream = common::start_echo_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    let legacy = raw_message(7, 0, OpCode::Insert.as_i32(), b"\0\0\0\0app.users\0opaque");
    client.write_all(&legacy).await.unwrap();
    assert_eq!(read_n(&mut client, legacy.len()).await, legacy);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(proxy.sink.records().is_empty());
}

#[tokio::test]
async fn capture_disabled_is_a_plain_pipe() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |config| config.capture.enabled = false).await;
    let mut client = proxy.connect().await;

    client
        .write_all(&op_msg(5, 0, &doc! { "insert": "users", "$db": "app", "documents": [] }))
        .await
        .unwrap();
    let reply_len = op_msg(0, 0, &doc! { "n": 1, "ok": 1.0 }).len();
    read_n(&mut client, reply_len).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(proxy.sink.records().is_empty());
}

#[tokio::test]
async fn refused_upstream_closes_client() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let proxy = start_proxy(dead_addr, |_| {}).await;
    let mut client = proxy.connect().await;

    assert!(common::closes_soon(&mut client).await);
    assert!(proxy.sink.records().is_empty());
}

#[tokio::test]
async fn framing_error_ends_the_session() {
    let upstream = common::start_echo_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    // Length field smaller than the header itself.
    let mut bad = raw_message(1, 0, OpCode::Msg.as_i32(), &[]);
    bad[..4].copy_from_slice(&4i32.to_le_bytes());
    client.write_all(&bad).await.unwrap();

    assert!(common::closes_soon(&mut client).await);
}

#[tokio::test]
async fn sessions_are_independent() {
    let upstream = common::start_acking_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut first = proxy.connect().await;
    let mut second = proxy.connect().await;

    // Same request id on both sessions.
    first
        .write_all(&op_msg(1, 0, &doc! { "insert": "a", "$db": "app", "documents": [] }))
        .await
        .unwrap();
    second
        .write_all(&op_msg(1, 0, &doc! { "delete": "b", "$db": "app", "deletes": [] }))
        .await
        .unwrap();

    let records = proxy.sink.wait_for(2, WAIT).await;
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].session, records[1].session);

    let mut namespaces: Vec<_> = records.iter().map(|r| r.info.namespace()).collect();
    namespaces.sort();
    assert_eq!(namespaces, vec!["app.a".to_string(), "app.b".to_string()]);
}

#[tokio::test]
async fn shutdown_closes_sessions_and_stops_server() {
    let upstream = common::start_echo_upstream().await;
    let proxy = start_proxy(upstream, |_| {}).await;
    let mut client = proxy.connect().await;

    // Make sure the session is established before shutting down.
    let ping = op_msg(1, 0, &doc! { "ping": 1, "$db": "admin" });
    client.write_all(&ping).await.unwrap();
    read_n(&mut client, ping.len()).await;

    proxy.shutdown.trigger();

    assert!(common::closes_soon(&mut client).await);
    let finished = tokio::time::timeout(Duration::from_secs(5), proxy.handle).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))));
}
