//! Shared fixtures for the core integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wsplex_core::*;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// A started memory engine linked to a fresh server.
pub async fn setup(engine_config: EngineConfig) -> (Arc<Engine>, Arc<Server>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let engine = Engine::builder(engine_config, Arc::new(MemoryTransport::new()))
        .build()
        .expect("Failed to build engine");
    let server = Server::with_observer(ServerConfig::new("ts0", "token server"), observer.clone())
        .expect("Failed to build server");
    server.add_engine(&engine);
    engine.start_engine().await.expect("Failed to start engine");
    (engine, server, observer)
}

pub async fn connect(engine: &Arc<Engine>, port: u16) -> Arc<MemoryConnector> {
    MemoryTransport::connect(engine, addr(port))
        .await
        .expect("Failed to connect")
}

pub fn handle(connector: &Arc<MemoryConnector>) -> ConnectorRef {
    connector.clone()
}

/// Records every dispatch failure.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    failures: Mutex<Vec<(Stage, String, Option<String>)>>,
}

impl RecordingObserver {
    pub fn failures(&self) -> Vec<(Stage, String, Option<String>)> {
        self.failures.lock().clone()
    }
}

impl DispatchObserver for RecordingObserver {
    fn on_failure(&self, failure: &DispatchFailure<'_>) {
        self.failures.lock().push((
            failure.stage,
            failure.component_id.to_string(),
            failure.connector_id.map(str::to_string),
        ));
    }
}

/// How a test plug-in reacts to packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Pass,
    Abort,
    Fail,
    Panic,
}

/// Plug-in that appends `<id>:<event>` entries to a shared journal.
pub struct JournalPlugIn {
    descriptor: Descriptor,
    journal: Arc<Mutex<Vec<String>>>,
    behavior: Behavior,
    enabled_calls: AtomicUsize,
}

impl JournalPlugIn {
    pub fn new(id: &str, journal: Arc<Mutex<Vec<String>>>, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Descriptor::new(id, "org.wsplex.test"),
            journal,
            behavior,
            enabled_calls: AtomicUsize::new(0),
        })
    }

    pub fn enabled_calls(&self) -> usize {
        self.enabled_calls.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        self.journal.lock().push(format!("{}:{}", self.id(), event));
    }
}

#[async_trait]
impl PlugIn for JournalPlugIn {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn engine_started(&self, _engine: &Arc<Engine>) -> Result<(), DispatchError> {
        self.record("engine_started");
        Ok(())
    }

    async fn engine_stopped(&self, _engine: &Arc<Engine>) -> Result<(), DispatchError> {
        self.record("engine_stopped");
        Ok(())
    }

    async fn connector_started(&self, _connector: &ConnectorRef) -> Result<(), DispatchError> {
        self.record("started");
        Ok(())
    }

    async fn connector_stopped(&self, _connector: &ConnectorRef, reason: CloseReason) -> Result<(), DispatchError> {
        self.record(&format!("stopped({reason})"));
        Ok(())
    }

    async fn process_packet(
        &self,
        response: &mut PlugInResponse,
        _connector: &ConnectorRef,
        _packet: &Packet,
    ) -> Result<(), DispatchError> {
        self.record("packet");
        match self.behavior {
            Behavior::Pass => Ok(()),
            Behavior::Abort => {
                response.abort_chain();
                Ok(())
            }
            Behavior::Fail => Err(DispatchError::handler("plug-in failure")),
            Behavior::Panic => panic!("plug-in panic"),
        }
    }

    fn process_enabled(&self, _enabled: bool) {
        self.enabled_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Plug-in whose `connector_started` takes `delay` to finish.
pub struct SlowStartPlugIn {
    descriptor: Descriptor,
    delay: Duration,
}

impl SlowStartPlugIn {
    pub fn new(id: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Descriptor::new(id, "org.wsplex.test"),
            delay,
        })
    }
}

#[async_trait]
impl PlugIn for SlowStartPlugIn {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn connector_started(&self, _connector: &ConnectorRef) -> Result<(), DispatchError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Filter that rejects inbound packets whose text contains `needle`.
pub struct RejectFilter {
    descriptor: Descriptor,
    needle: String,
    journal: Arc<Mutex<Vec<String>>>,
}

impl RejectFilter {
    pub fn new(id: &str, needle: &str, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Descriptor::new(id, "org.wsplex.test"),
            needle: needle.to_string(),
            journal,
        })
    }
}

#[async_trait]
impl Filter for RejectFilter {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn process_packet_in(
        &self,
        response: &mut FilterResponse,
        _connector: &ConnectorRef,
        packet: &Packet,
    ) -> Result<(), DispatchError> {
        self.journal.lock().push(format!("{}:in", self.id()));
        if packet.as_str().is_some_and(|text| text.contains(&self.needle)) {
            response.reject_message();
        }
        Ok(())
    }

    async fn process_packet_out(
        &self,
        response: &mut FilterResponse,
        _source: Option<&ConnectorRef>,
        _target: &ConnectorRef,
        packet: &Packet,
    ) -> Result<(), DispatchError> {
        self.journal.lock().push(format!("{}:out", self.id()));
        if packet.as_str().is_some_and(|text| text.contains(&self.needle)) {
            response.reject_message();
        }
        Ok(())
    }
}

/// Listener that journals every callback.
pub struct JournalListener {
    journal: Arc<Mutex<Vec<String>>>,
}

impl JournalListener {
    pub fn new(journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { journal })
    }
}

#[async_trait]
impl ServerListener for JournalListener {
    fn name(&self) -> &str {
        "journal"
    }

    async fn process_opened(&self, event: &ServerEvent) -> Result<(), DispatchError> {
        self.journal.lock().push(format!("listener:opened:{}", event.connector().id()));
        Ok(())
    }

    async fn process_packet(&self, _event: &ServerEvent, _packet: &Packet) -> Result<(), DispatchError> {
        self.journal.lock().push("listener:packet".to_string());
        Ok(())
    }

    async fn process_closed(&self, _event: &ServerEvent, reason: CloseReason) -> Result<(), DispatchError> {
        self.journal.lock().push(format!("listener:closed({reason})"));
        Ok(())
    }
}

pub fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    journal.lock().clone()
}
