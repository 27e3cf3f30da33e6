//! Engine connector registry and lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use wsplex_core::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_add_remove_during_broadcast() {
    let (engine, _server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;

    let mut clients = Vec::new();
    for port in 0..50u16 {
        clients.push(connect(&engine, 5000 + port).await);
    }
    assert_eq!(engine.connector_count(), 50);

    let broadcaster = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                engine.broadcast_packet(&Packet::text("tick")).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let mut removals = Vec::new();
    for client in clients.iter().take(20).cloned() {
        removals.push(tokio::spawn(async move { client.disconnect(CloseReason::Client).await }));
    }
    for removal in removals {
        removal.await.expect("Failed to join removal task");
    }
    broadcaster.await.expect("Failed to join broadcaster");

    assert_eq!(engine.connector_count(), 30);
    for client in clients.iter().skip(20) {
        assert!(engine.connector(client.id()).is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_is_idempotent() {
    let (engine, _server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let client = handle(&connect(&engine, 4000).await);

    assert!(engine.remove_connector(&client));
    assert!(!engine.remove_connector(&client));
    assert_eq!(engine.connector_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lookup_by_remote_port() {
    let (engine, _server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let a = connect(&engine, 4000).await;
    let _b = connect(&engine, 4001).await;

    let found = engine.connector_by_remote_port(4000).expect("Failed to find connector by port");
    assert_eq!(found.id(), a.id());
    assert!(engine.connector_by_remote_port(4999).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_engine_stops_connectors_first() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let journal = journal();
    server.plugin_chain().add_plugin(JournalPlugIn::new("p1", journal.clone(), Behavior::Pass));

    let a = connect(&engine, 4000).await;
    let b = connect(&engine, 4001).await;
    journal.lock().clear();

    engine.stop_engine(CloseReason::Shutdown).await.expect("Failed to stop engine");

    let log = entries(&journal);
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], "p1:stopped(shutdown)");
    assert_eq!(log[1], "p1:stopped(shutdown)");
    assert_eq!(log[2], "p1:engine_stopped");

    assert!(!engine.is_alive());
    assert_eq!(engine.connector_count(), 0);
    assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
    assert_eq!(b.close_reason(), Some(CloseReason::Shutdown));

    // Stopping twice is a no-op; late disconnects fire no callbacks.
    engine.stop_engine(CloseReason::Shutdown).await.expect("Failed to stop engine twice");
    a.disconnect(CloseReason::Client).await;
    assert_eq!(entries(&journal).len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_requires_running_engine() {
    let engine = Engine::builder(EngineConfig::new("mem0", "memory"), Arc::new(MemoryTransport::new()))
        .build()
        .expect("Failed to build engine");

    let result = MemoryTransport::connect(&engine, addr(4000)).await;
    assert!(matches!(result, Err(CoreError::EngineNotRunning(_))));
    assert_eq!(engine.connector_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_engine_config_rejected() {
    let result = Engine::builder(EngineConfig::new("", "memory"), Arc::new(MemoryTransport::new())).build();
    assert!(matches!(result, Err(ConfigError::MissingField { field: "id", .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_connections_from_config() {
    let config = EngineConfig::new("mem0", "memory").with_max_connections(2, MaxConnectionsStrategy::Reject);
    let (engine, _server, _observer) = setup(config).await;

    assert_eq!(engine.max_connections(), 2);
    assert_eq!(engine.on_max_connections_strategy(), MaxConnectionsStrategy::Reject);

    let _a = connect(&engine, 4000).await;
    assert!(!engine.is_at_capacity());
    let _b = connect(&engine, 4001).await;
    assert!(engine.is_at_capacity());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_server_does_not_block_others() {
    let engine = Engine::builder(EngineConfig::new("mem0", "memory"), Arc::new(MemoryTransport::new()))
        .build()
        .expect("Failed to build engine");
    let first = Server::new(ServerConfig::new("ts0", "first")).expect("Failed to build server");
    let second = Server::new(ServerConfig::new("ts1", "second")).expect("Failed to build server");
    first.add_engine(&engine);
    second.add_engine(&engine);
    engine.start_engine().await.expect("Failed to start engine");

    let journal = journal();
    first.plugin_chain().add_plugin(JournalPlugIn::new("broken", journal.clone(), Behavior::Panic));
    second.plugin_chain().add_plugin(JournalPlugIn::new("healthy", journal.clone(), Behavior::Pass));

    let client = connect(&engine, 4000).await;
    journal.lock().clear();
    client.receive(Packet::text("hello")).await;

    let log = entries(&journal);
    assert!(log.contains(&"broken:packet".to_string()));
    assert!(log.contains(&"healthy:packet".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connector_id_carries_node_id() {
    let instance = InstanceConfig {
        node_id: Some("n1".to_string()),
    };
    let engine = Engine::builder(EngineConfig::new("mem0", "memory"), Arc::new(MemoryTransport::new()))
        .instance(&instance)
        .build()
        .expect("Failed to build engine");
    engine.start_engine().await.expect("Failed to start engine");

    let client = connect(&engine, 4321).await;
    assert!(client.id().starts_with("n1.4321."));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_engine_links() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    assert_eq!(engine.servers().len(), 1);
    assert!(server.engine("mem0").is_some());

    assert!(server.remove_engine("mem0"));
    assert!(engine.servers().is_empty());
    assert!(!server.remove_engine("mem0"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_engine_stop_waits_for_connector_start() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let journal = journal();
    server
        .plugin_chain()
        .add_plugin(SlowStartPlugIn::new("slow", Duration::from_millis(200)));
    server.plugin_chain().add_plugin(JournalPlugIn::new("rec", journal.clone(), Behavior::Pass));

    let connecting = {
        let engine = engine.clone();
        tokio::spawn(async move { MemoryTransport::connect(&engine, addr(4300)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.stop_engine(CloseReason::Shutdown).await.expect("Failed to stop engine");

    let client = connecting
        .await
        .expect("Failed to join connect task")
        .expect("Failed to connect");
    assert_eq!(
        entries(&journal),
        vec!["rec:started", "rec:stopped(shutdown)", "rec:engine_stopped"]
    );
    assert_eq!(client.close_reason(), Some(CloseReason::Shutdown));
    assert_eq!(engine.connector_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_during_start_is_delivered_after_start() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let journal = journal();
    server
        .plugin_chain()
        .add_plugin(SlowStartPlugIn::new("slow", Duration::from_millis(200)));
    server.plugin_chain().add_plugin(JournalPlugIn::new("rec", journal.clone(), Behavior::Pass));

    let client = Arc::new(MemoryConnector::new(&engine, addr(4301)));
    let registering = {
        let engine = engine.clone();
        let handle = handle(&client);
        tokio::spawn(async move { engine.register_connector(&handle).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect(CloseReason::Client).await;

    let result = registering.await.expect("Failed to join register task");
    assert!(matches!(result, Err(CoreError::ConnectorStopped(_))));
    assert_eq!(entries(&journal), vec!["rec:started", "rec:stopped(client)"]);
    assert_eq!(client.close_reason(), Some(CloseReason::Client));
    assert_eq!(engine.connector_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_before_start_is_silent() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let journal = journal();
    server.plugin_chain().add_plugin(JournalPlugIn::new("rec", journal.clone(), Behavior::Pass));

    let client = Arc::new(MemoryConnector::new(&engine, addr(4302)));
    client.disconnect(CloseReason::Broken).await;

    let result = engine.register_connector(&handle(&client)).await;
    assert!(matches!(result, Err(CoreError::ConnectorStopped(_))));
    assert!(entries(&journal).is_empty());
    assert_eq!(engine.connector_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_servers_are_pruned_on_relink() {
    let (engine, server, _observer) = setup(EngineConfig::new("mem0", "memory")).await;
    let transient = Server::new(ServerConfig::new("ts1", "transient")).expect("Failed to build server");
    transient.add_engine(&engine);
    assert_eq!(engine.servers().len(), 2);

    drop(transient);
    let live: Vec<String> = engine.servers().iter().map(|s| s.id().to_string()).collect();
    assert_eq!(live, vec![server.id().to_string()]);
    assert!(format!("{engine:?}").contains("servers: 2"));

    let replacement = Server::new(ServerConfig::new("ts2", "replacement")).expect("Failed to build server");
    replacement.add_engine(&engine);
    assert!(format!("{engine:?}").contains("servers: 2"));
    assert_eq!(engine.servers().len(), 2);
}
