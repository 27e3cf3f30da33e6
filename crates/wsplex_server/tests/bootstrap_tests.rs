//! Instance assembly from configuration, using the in-memory transport.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use wsplex_core::*;
use wsplex_server::{BootstrapError, ComponentRegistry, Config, Instance};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn memory_config() -> Config {
    Config {
        engines: vec![EngineConfig::new("mem0", "memory")],
        servers: vec![ServerConfig::new("ts0", "token server"), ServerConfig::new("ts1", "admin server")],
        filters: vec![ComponentConfig::new("size", "packet_size", "org.wsplex.filters.size")
            .with_setting("max_size", json!(8))
            .with_servers(["ts0"])],
        plugins: vec![ComponentConfig::new("echo", "echo", "org.wsplex.plugins.echo").with_servers(["ts0"])],
        ..Config::default()
    }
}

fn build(config: &Config) -> Result<Instance, BootstrapError> {
    Instance::build_with(config, &ComponentRegistry::with_builtins(), |_| Arc::new(MemoryTransport::new()))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_components_assigned_per_server() {
    let instance = build(&memory_config()).expect("Failed to build instance");

    let ts0 = instance.server("ts0").expect("Failed to find ts0");
    let ts1 = instance.server("ts1").expect("Failed to find ts1");
    assert_eq!(ts0.filter_chain().len(), 1);
    assert_eq!(ts0.plugin_chain().len(), 1);
    assert!(ts1.filter_chain().is_empty());
    assert!(ts1.plugin_chain().is_empty());

    let engine = instance.engine("mem0").expect("Failed to find engine");
    assert_eq!(engine.servers().len(), 2);
    assert!(ts0.plugin_by_id("echo").and_then(|plugin| plugin.server()).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_and_size_filter_end_to_end() {
    let instance = build(&memory_config()).expect("Failed to build instance");
    instance.start().await.expect("Failed to start instance");
    let engine = instance.engine("mem0").expect("Failed to find engine");

    let client = MemoryTransport::connect(engine, addr(4000)).await.expect("Failed to connect");
    client.receive(Packet::text("ping")).await;
    client.receive(Packet::text("far too long")).await;
    assert_eq!(client.sent(), vec![Packet::text("ping")]);

    instance.stop(CloseReason::Shutdown).await;
    assert_eq!(client.close_reason(), Some(CloseReason::Shutdown));
    assert!(!engine.is_alive());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relay_between_clients() {
    let config = Config {
        engines: vec![EngineConfig::new("mem0", "memory")],
        servers: vec![ServerConfig::new("ts0", "token server")],
        filters: Vec::new(),
        plugins: vec![ComponentConfig::new("relay", "relay", "org.wsplex.plugins.relay")],
        ..Config::default()
    };
    let instance = build(&config).expect("Failed to build instance");
    instance.start().await.expect("Failed to start instance");
    let engine = instance.engine("mem0").expect("Failed to find engine");

    let a = MemoryTransport::connect(engine, addr(4000)).await.expect("Failed to connect a");
    let b = MemoryTransport::connect(engine, addr(4001)).await.expect("Failed to connect b");
    let c = MemoryTransport::connect(engine, addr(4002)).await.expect("Failed to connect c");

    a.receive(Packet::text("hello room")).await;
    assert!(a.sent().is_empty());
    assert_eq!(b.sent(), vec![Packet::text("hello room")]);
    assert_eq!(c.sent(), vec![Packet::text("hello room")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_component_from_config() {
    let mut config = memory_config();
    config.plugins[0].enabled = false;
    let instance = build(&config).expect("Failed to build instance");
    instance.start().await.expect("Failed to start instance");
    let engine = instance.engine("mem0").expect("Failed to find engine");

    let client = MemoryTransport::connect(engine, addr(4000)).await.expect("Failed to connect");
    client.receive(Packet::text("ping")).await;
    assert!(client.sent().is_empty());

    let ts0 = instance.server("ts0").expect("Failed to find ts0");
    ts0.plugin_by_id("echo").expect("Failed to find echo").set_enabled(true);
    client.receive(Packet::text("pong")).await;
    assert_eq!(client.sent(), vec![Packet::text("pong")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_component_name() {
    let mut config = memory_config();
    config.plugins[0].name = "does_not_exist".to_string();
    assert!(matches!(build(&config), Err(BootstrapError::UnknownPlugIn { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_config_rejected() {
    let mut config = memory_config();
    config.servers[0].thread_pool.max_pool_size = 0;
    assert!(matches!(build(&config), Err(BootstrapError::Config(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_node_id_from_instance_config() {
    let mut config = memory_config();
    config.instance.node_id = Some("n4".to_string());
    let instance = build(&config).expect("Failed to build instance");
    instance.start().await.expect("Failed to start instance");
    let engine = instance.engine("mem0").expect("Failed to find engine");

    let client = MemoryTransport::connect(engine, addr(4010)).await.expect("Failed to connect");
    assert!(client.id().starts_with("n4.4010."));
}
