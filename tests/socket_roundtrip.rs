//! Framed MessagePack requests over a real Unix socket.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::{UnixListener, UnixStream};

use rtpf::metrics::Metrics;
use rtpf::protocol::{decode_request, encode_response, read_frame, write_frame, ResponseEnvelope};
use rtpf::signature::query_pattern;
use rtpf::{
    AppContext, BiolinkModel, ClosureEngine, Keyspace, KvStore, MemoryStore, RequestHandler,
};

const MINI: &str = include_str!("fixtures/biolink_mini.yaml");

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let node = |id: &str, cat: &str| json!({"id": id, "categories": [cat], "attributes": []}).to_string();
    store
        .set_many(
            Keyspace::NodeId,
            vec![("CHEBI:1".into(), "1".into()), ("NCBIGene:2".into(), "2".into())],
        )
        .await
        .unwrap();
    store
        .set_many(
            Keyspace::NodePayload,
            vec![
                ("1".into(), node("CHEBI:1", "biolink:SmallMolecule")),
                ("2".into(), node("NCBIGene:2", "biolink:Gene")),
            ],
        )
        .await
        .unwrap();
    store
        .set_many(
            Keyspace::Category,
            vec![("biolink:SmallMolecule".into(), "1".into()), ("biolink:Gene".into(), "2".into())],
        )
        .await
        .unwrap();
    store
        .set(Keyspace::Signature, r#"{"predicate": "biolink:treats"}"#, "1")
        .await
        .unwrap();
    store
        .set(
            Keyspace::EdgePayload,
            "1",
            &json!({"subject": "CHEBI:1", "predicate": "biolink:treats", "object": "NCBIGene:2"}).to_string(),
        )
        .await
        .unwrap();
    store
        .append_many(
            Keyspace::Pattern,
            vec![(query_pattern(1, 1, 2), vec![1, 2]), (query_pattern(1, -1, 2), vec![1, 1])],
        )
        .await
        .unwrap();
    store
}

/// Serve one connection the way the server binary does.
async fn serve_one(listener: UnixListener, handler: Arc<RequestHandler>) {
    let (mut stream, _) = listener.accept().await.unwrap();
    while let Some(frame) = read_frame(&mut stream).await.unwrap() {
        let envelope = decode_request(&frame).unwrap();
        let response = handler.handle_request(envelope.request).await;
        let bytes = encode_response(&ResponseEnvelope { request_id: envelope.request_id, response }).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();
    }
}

async fn call(stream: &mut UnixStream, request: Value) -> Value {
    let bytes = rmp_serde::to_vec_named(&request).unwrap();
    write_frame(stream, &bytes).await.unwrap();
    let reply = read_frame(stream).await.unwrap().unwrap();
    rmp_serde::from_slice(&reply).unwrap()
}

#[tokio::test]
async fn test_socket_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtpf.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let closures = ClosureEngine::build(&BiolinkModel::from_yaml_str(MINI).unwrap()).unwrap();
    let ctx = AppContext::new(Arc::new(seeded_store().await), closures, "infores:test");
    let handler = Arc::new(RequestHandler::new(Arc::new(ctx), Some(Arc::new(Metrics::new()))));
    let server = tokio::spawn(serve_one(listener, Arc::clone(&handler)));

    let mut client = UnixStream::connect(&path).await.unwrap();

    let pong = call(&mut client, json!({"cmd": "ping", "requestId": "r1"})).await;
    assert_eq!(pong["pong"], true);
    assert_eq!(pong["requestId"], "r1");

    let answer = call(
        &mut client,
        json!({"cmd": "query", "requestId": "r2", "message": {"query_graph": {
            "nodes": {"n0": {"ids": ["CHEBI:1"]}, "n1": {"categories": ["biolink:Gene"]}},
            "edges": {"e0": {"subject": "n0", "object": "n1", "predicates": ["biolink:treats"]}}
        }}}),
    )
    .await;
    assert_eq!(answer["requestId"], "r2");
    let results = answer["message"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["node_bindings"]["n1"][0]["id"], "NCBIGene:2");
    assert_eq!(results[0]["analyses"][0]["edge_bindings"]["e0"][0]["id"], "knowledge_edge_0");
    assert_eq!(answer["message"]["knowledge_graph"]["edges"]["knowledge_edge_0"]["object"], "NCBIGene:2");

    let bad = call(
        &mut client,
        json!({"cmd": "query", "message": {"query_graph": {
            "nodes": {"n0": {"ids": ["CHEBI:1"]}, "n1": {"categories": ["biolink:NotAType"]}},
            "edges": {"e0": {"subject": "n0", "object": "n1"}}
        }}}),
    )
    .await;
    assert_eq!(bad["code"], "UNKNOWN_TYPE");
    assert!(bad.get("requestId").is_none());

    let stats = call(&mut client, json!({"cmd": "getStats"})).await;
    assert!(stats["stats"]["typeClosures"].as_u64().unwrap() > 0);
    assert_eq!(stats["stats"]["metrics"]["queryErrors"], 1);

    drop(client);
    server.await.unwrap();
}
