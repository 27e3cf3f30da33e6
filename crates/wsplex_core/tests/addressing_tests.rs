//! Connector lookup, selection and broadcast.

mod common;

use std::collections::HashMap;

use common::*;
use wsplex_core::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_select_by_username_pattern() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    let _c = connect(&engine, 4002).await;
    a.core().set_username("alice");
    b.core().set_username("bob");

    let filter = HashMap::from([("$username".to_string(), json!("^alice$"))]);
    let selected = server.select_connectors(&filter);
    assert_eq!(selected.len(), 1);
    assert!(selected.contains_key(a.id()));

    let filter = HashMap::from([("$username".to_string(), json!(".*"))]);
    assert_eq!(server.select_connectors(&filter).len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_select_requires_every_key() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    a.core().vars().set_string("room", "lobby");
    a.core().vars().set_boolean("moderator", true);
    a.core().vars().set_integer("level", 3);
    b.core().vars().set_string("room", "lobby");
    b.core().vars().set_boolean("moderator", false);

    let filter = HashMap::from([
        ("room".to_string(), json!("lob.*")),
        ("moderator".to_string(), json!(true)),
    ]);
    let selected = server.select_connectors(&filter);
    assert_eq!(selected.keys().collect::<Vec<_>>(), vec![a.id()]);

    let filter = HashMap::from([("level".to_string(), json!(3))]);
    assert_eq!(server.select_connectors(&filter).len(), 1);

    let filter = HashMap::from([("room".to_string(), json!("[invalid"))]);
    assert!(server.select_connectors(&filter).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_connector_lookups() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    a.core().set_username("alice");
    b.core().set_node_id("node-b");

    assert_eq!(server.connector(a.id()).map(|c| c.id().to_string()), Some(a.id().to_string()));
    assert_eq!(
        server.connector_on("mem0", b.id()).map(|c| c.id().to_string()),
        Some(b.id().to_string())
    );
    assert!(server.connector_on("other", b.id()).is_none());
    assert_eq!(server.connectors_of("mem0").len(), 2);
    assert_eq!(server.connector_count(), 2);

    let by_var = server.connector_by_var("$username", "ali.*").expect("Failed to find connector by variable");
    assert_eq!(by_var.id(), a.id());

    let node = server.node("node-b").expect("Failed to find connector by node id");
    assert_eq!(node.id(), b.id());
    assert!(server.node("node-.*").is_none());

    assert_eq!(server.connectors_by_username("alice").len(), 1);
    assert_eq!(server.username(&handle(&a)), Some("alice".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_excludes_sender() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    let c = connect(&engine, 4002).await;
    let packet = Packet::text("hello everyone");

    let outcome = server
        .broadcast_packet(Some(&handle(&a)), &packet, BroadcastOptions::new())
        .await;
    assert_eq!(outcome.targets, 2);
    assert_eq!(outcome.delivered, 2);
    assert!(a.sent().is_empty());
    assert_eq!(b.sent(), vec![packet.clone()]);
    assert_eq!(c.sent(), vec![packet.clone()]);

    let outcome = server
        .broadcast_packet(Some(&handle(&a)), &packet, BroadcastOptions::new().sender_included(true))
        .await;
    assert_eq!(outcome.delivered, 3);
    assert_eq!(a.sent(), vec![packet]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_broadcast_returns_futures() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let _a = connect(&engine, 4000).await;
    let _b = connect(&engine, 4001).await;

    let outcome = server
        .broadcast_packet(None, &Packet::binary(vec![1, 2, 3]), BroadcastOptions::new().asynchronous(true))
        .await;
    assert_eq!(outcome.pending.len(), 2);
    for future in &outcome.pending {
        assert_eq!(future.wait().await, IoOutcome::Success);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_failure_is_per_target() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    let c = connect(&engine, 4002).await;
    b.set_fail_writes(true);

    let outcome = server
        .broadcast_packet(Some(&handle(&a)), &Packet::text("hi"), BroadcastOptions::new())
        .await;
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, b.id());
    assert_eq!(c.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transactional_send_and_async_failure() {
    let (engine, _server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;

    a.send_packets(&[Packet::text("one"), Packet::text("two")])
        .await
        .expect("Failed to send packets");
    assert_eq!(a.take_sent(), vec![Packet::text("one"), Packet::text("two")]);

    a.disconnect(CloseReason::Server).await;
    let future = a.send_packet_async(Packet::text("late"));
    assert!(future.is_done());
    assert!(matches!(future.cause(), Some(SendError::NotConnected(_))));
}
