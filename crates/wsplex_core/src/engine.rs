//! Engines: one per transport endpoint.
//!
//! An engine owns the registry of live connectors for its transport and relays
//! connector lifecycle and inbound packets to every server it is linked to.
//! Connector registration is safe under concurrent access; iteration always
//! works on a snapshot, so adding or removing connectors while a broadcast is
//! running neither blocks nor invalidates it.
//!
//! Connector starts hold the engine's lifecycle gate for reading and
//! `stop_engine` holds it for writing, so a start notification never
//! overlaps an engine stop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, InstanceConfig, MaxConnectionsStrategy};
use crate::connector::state::StopStep;
use crate::connector::{ConnectorLifecycle, ConnectorRef, ConnectorStatus};
use crate::dispatch::{guarded, DispatchObserver, Stage, TracingObserver};
use crate::error::{ConfigError, CoreError, SendError};
use crate::packet::{CloseReason, Packet};
use crate::server::Server;

/// Network side of an engine.
///
/// `start` begins accepting connections and returns once the endpoint is
/// ready; `stop` stops accepting. Accepted connections are registered with
/// [`Engine::register_connector`].
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn start(&self, engine: &Arc<Engine>) -> Result<(), CoreError>;
    async fn stop(&self, engine: &Arc<Engine>) -> Result<(), CoreError>;
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    node_id: Option<String>,
    observer: Arc<dyn DispatchObserver>,
}

impl EngineBuilder {
    /// Prefixes connector ids with the instance's node id.
    pub fn instance(mut self, instance: &InstanceConfig) -> Self {
        self.node_id = instance.node_id().map(str::to_string);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validates the configuration and creates the engine.
    pub fn build(self) -> Result<Arc<Engine>, ConfigError> {
        self.config.validate()?;
        Ok(Arc::new(Engine {
            session_timeout_ms: AtomicU64::new(self.config.timeout_ms),
            config: self.config,
            node_id: self.node_id,
            transport: self.transport,
            observer: self.observer,
            connectors: DashMap::new(),
            servers: DashMap::new(),
            state: AtomicU8::new(STOPPED),
            lifecycle: RwLock::new(()),
        }))
    }
}

/// A transport endpoint and its connector registry.
pub struct Engine {
    config: EngineConfig,
    node_id: Option<String>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn DispatchObserver>,
    connectors: DashMap<String, ConnectorRef>,
    servers: DashMap<String, Weak<Server>>,
    state: AtomicU8,
    lifecycle: RwLock<()>,
    session_timeout_ms: AtomicU64,
}

impl Engine {
    /// Starts building an engine for `config` on top of `transport`.
    pub fn builder(config: EngineConfig, transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder {
            config,
            transport,
            node_id: None,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn max_connections(&self) -> u32 {
        self.config.max_connections
    }

    pub fn on_max_connections_strategy(&self) -> MaxConnectionsStrategy {
        self.config.on_max_connections
    }

    pub fn max_frame_size(&self) -> usize {
        self.config.max_frame_size
    }

    /// Idle timeout for connectors, `None` when disabled.
    pub fn session_timeout(&self) -> Option<Duration> {
        match self.session_timeout_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_session_timeout(&self, timeout: Option<Duration>) {
        let ms = timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self.session_timeout_ms.store(ms, Ordering::SeqCst);
    }

    /// `true` between a successful start and the beginning of a stop.
    pub fn is_alive(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// `true` once the connection limit is reached.
    pub fn is_at_capacity(&self) -> bool {
        self.connector_count() >= self.config.max_connections as usize
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the transport and notifies every linked server.
    ///
    /// Starting a running engine is a no-op.
    pub async fn start_engine(self: &Arc<Self>) -> Result<(), CoreError> {
        if self
            .state
            .compare_exchange(STOPPED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(engine_id = %self.id(), "Engine already running");
            return Ok(());
        }

        if let Err(e) = self.transport.start(self).await {
            self.state.store(STOPPED, Ordering::SeqCst);
            return Err(e);
        }

        info!("🚀 Engine '{}' started", self.id());
        self.engine_started().await;
        Ok(())
    }

    /// Stops every connector, then the transport, then notifies servers.
    ///
    /// No connector callback fires after `engine_stopped` has been delivered.
    pub async fn stop_engine(self: &Arc<Self>, reason: CloseReason) -> Result<(), CoreError> {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let _gate = self.lifecycle.write().await;

        info!("🛑 Stopping engine '{}' ({} connectors)", self.id(), self.connector_count());
        self.stop_all_connectors(reason).await;
        let result = self.transport.stop(self).await;
        // Connections accepted while the transport was shutting down.
        self.stop_all_connectors(reason).await;

        self.engine_stopped().await;
        self.state.store(STOPPED, Ordering::SeqCst);
        info!("✅ Engine '{}' stopped", self.id());
        result
    }

    async fn stop_all_connectors(&self, reason: CloseReason) {
        let mut stops: FuturesUnordered<_> = self
            .connectors()
            .into_iter()
            .map(|connector| async move { connector.stop_connector(reason).await })
            .collect();
        while stops.next().await.is_some() {}
    }

    async fn engine_started(self: &Arc<Self>) {
        for server in self.servers() {
            let task = async { server.engine_started(self).await };
            guarded(self.observer.as_ref(), Stage::ServerEngineStarted, server.id(), None, task).await;
        }
    }

    async fn engine_stopped(self: &Arc<Self>) {
        for server in self.servers() {
            let task = async { server.engine_stopped(self).await };
            guarded(self.observer.as_ref(), Stage::ServerEngineStopped, server.id(), None, task).await;
        }
    }

    /// Adds and starts a newly accepted connector.
    ///
    /// # Errors
    /// * `EngineNotRunning` if the engine is not running
    /// * `ConnectorStopped` if the connector was stopped while its start was
    ///   being delivered; it is no longer registered
    pub async fn register_connector(self: &Arc<Self>, connector: &ConnectorRef) -> Result<(), CoreError> {
        let _gate = self.lifecycle.read().await;
        if !self.is_alive() {
            return Err(CoreError::EngineNotRunning(self.id().to_string()));
        }
        self.add_connector(connector);
        self.deliver_started(connector).await
    }

    /// Marks the connector up and notifies every linked server.
    ///
    /// # Errors
    /// * `EngineNotRunning` if the engine is not running
    /// * `ConnectorStopped` if the connector was stopped meanwhile
    pub async fn connector_started(self: &Arc<Self>, connector: &ConnectorRef) -> Result<(), CoreError> {
        let _gate = self.lifecycle.read().await;
        if !self.is_alive() {
            return Err(CoreError::EngineNotRunning(self.id().to_string()));
        }
        self.deliver_started(connector).await
    }

    /// Start fan-out. The caller holds the lifecycle gate for reading.
    ///
    /// A stop arriving during the fan-out is delivered once it has finished.
    async fn deliver_started(self: &Arc<Self>, connector: &ConnectorRef) -> Result<(), CoreError> {
        if !connector.core().begin_start() {
            self.remove_connector(connector);
            return Err(CoreError::ConnectorStopped(connector.id().to_string()));
        }
        connector.core().set_status(ConnectorStatus::Up);
        debug!(engine_id = %self.id(), connector_id = %connector.id(), "Connector started");

        for server in self.servers() {
            let task = async { server.connector_started(connector).await };
            guarded(
                self.observer.as_ref(),
                Stage::ServerConnectorStarted,
                server.id(),
                Some(connector.id()),
                task,
            )
            .await;
        }

        match connector.core().finish_start() {
            Some(reason) => {
                self.deliver_stopped(connector, reason).await;
                Err(CoreError::ConnectorStopped(connector.id().to_string()))
            }
            None => Ok(()),
        }
    }

    /// Notifies servers that the connector stopped and removes it.
    ///
    /// Returns `false` without doing anything if the connector was already
    /// stopped. A stop that arrives while the connector's start is still being
    /// delivered is handed to that start and delivered right after it. A
    /// connector whose start was never delivered, or any connector after the
    /// engine itself has stopped, is removed silently.
    pub async fn connector_stopped(self: &Arc<Self>, connector: &ConnectorRef, reason: CloseReason) -> bool {
        if !connector.core().mark_stopped() {
            return false;
        }
        connector.core().set_status(ConnectorStatus::Down);
        match connector.core().begin_stop(reason) {
            StopStep::Notify => self.deliver_stopped(connector, reason).await,
            StopStep::Deferred => {}
            StopStep::Unstarted => {
                self.remove_connector(connector);
            }
        }
        true
    }

    async fn deliver_stopped(self: &Arc<Self>, connector: &ConnectorRef, reason: CloseReason) {
        connector.core().set_status(ConnectorStatus::Down);
        if self.state.load(Ordering::SeqCst) != STOPPED {
            debug!(engine_id = %self.id(), connector_id = %connector.id(), %reason, "Connector stopped");
            for server in self.servers() {
                let task = async { server.connector_stopped(connector, reason).await };
                guarded(
                    self.observer.as_ref(),
                    Stage::ServerConnectorStopped,
                    server.id(),
                    Some(connector.id()),
                    task,
                )
                .await;
            }
        }

        self.remove_connector(connector);
    }

    /// Hands an inbound packet to every linked server.
    pub async fn process_packet(self: &Arc<Self>, connector: &ConnectorRef, packet: &Packet) {
        for server in self.servers() {
            let task = async {
                server.process_packet(connector, packet).await;
                Ok(())
            };
            guarded(
                self.observer.as_ref(),
                Stage::ServerPacket,
                server.id(),
                Some(connector.id()),
                task,
            )
            .await;
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    pub async fn send_packet(&self, connector: &ConnectorRef, packet: &Packet) -> Result<(), SendError> {
        connector.send_packet(packet).await
    }

    /// Sends `packet` to every connector of this engine.
    ///
    /// Returns the number of successful deliveries. Failures are logged.
    pub async fn broadcast_packet(&self, packet: &Packet) -> usize {
        let mut sends: FuturesUnordered<_> = self
            .connectors()
            .into_iter()
            .map(|connector| async move {
                let result = connector.send_packet(packet).await;
                (connector, result)
            })
            .collect();

        let mut delivered = 0;
        while let Some((connector, result)) = sends.next().await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(engine_id = %self.id(), connector_id = %connector.id(), "Broadcast failed: {}", e),
            }
        }
        delivered
    }

    // ========================================================================
    // Connector registry
    // ========================================================================

    /// Registers a connector. Adding the same id again replaces the entry.
    pub fn add_connector(&self, connector: &ConnectorRef) {
        self.connectors.insert(connector.id().to_string(), connector.clone());
    }

    /// Unregisters a connector. Returns `false` if it was not registered.
    pub fn remove_connector(&self, connector: &ConnectorRef) -> bool {
        self.connectors.remove(connector.id()).is_some()
    }

    /// Snapshot of all registered connectors.
    pub fn connectors(&self) -> Vec<ConnectorRef> {
        self.connectors.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Snapshot of the registry keyed by connector id.
    pub fn connector_map(&self) -> HashMap<String, ConnectorRef> {
        self.connectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn connector(&self, id: &str) -> Option<ConnectorRef> {
        self.connectors.get(id).map(|entry| entry.value().clone())
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    pub fn connector_by_remote_port(&self, port: u16) -> Option<ConnectorRef> {
        self.connectors
            .iter()
            .find(|entry| entry.value().core().remote_port() == Some(port))
            .map(|entry| entry.value().clone())
    }

    // ========================================================================
    // Servers
    // ========================================================================

    /// Links a server. Called by [`Server::add_engine`].
    pub fn add_server(&self, server: &Arc<Server>) {
        self.prune_servers();
        self.servers.insert(server.id().to_string(), Arc::downgrade(server));
    }

    pub fn remove_server(&self, server_id: &str) -> bool {
        let removed = self.servers.remove(server_id).is_some();
        self.prune_servers();
        removed
    }

    /// Linked servers that are still alive.
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.iter().filter_map(|entry| entry.value().upgrade()).collect()
    }

    fn prune_servers(&self) {
        self.servers.retain(|_, server| server.strong_count() > 0);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.config.id)
            .field("alive", &self.is_alive())
            .field("connectors", &self.connectors.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}
