//! Plug-ins and the plug-in chain.
//!
//! Plug-ins carry the application logic. Engine lifecycle events reach every
//! plug-in; connector events and packets reach enabled plug-ins only. A
//! plug-in can abort packet processing for the rest of the chain through its
//! [`PlugInResponse`]. Failures are isolated per plug-in and never abort.

use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::debug;

use crate::connector::{Connector, ConnectorRef};
use crate::descriptor::Descriptor;
use crate::dispatch::{guarded, DispatchObserver, Stage};
use crate::engine::Engine;
use crate::error::DispatchError;
use crate::packet::{CloseReason, Packet};
use crate::server::Server;

/// Result of one plug-in chain traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlugInResponse {
    aborted: bool,
}

impl PlugInResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the chain after the current plug-in.
    pub fn abort_chain(&mut self) {
        self.aborted = true;
    }

    pub fn is_chain_aborted(&self) -> bool {
        self.aborted
    }
}

/// An application plug-in. Every hook defaults to doing nothing.
#[async_trait]
pub trait PlugIn: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    async fn engine_started(&self, _engine: &Arc<Engine>) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn engine_stopped(&self, _engine: &Arc<Engine>) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn connector_started(&self, _connector: &ConnectorRef) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn connector_stopped(&self, _connector: &ConnectorRef, _reason: CloseReason) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn process_packet(
        &self,
        _response: &mut PlugInResponse,
        _connector: &ConnectorRef,
        _packet: &Packet,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Called when the enabled flag actually changes.
    fn process_enabled(&self, _enabled: bool) {}

    fn id(&self) -> &str {
        self.descriptor().id()
    }

    fn namespace(&self) -> &str {
        self.descriptor().namespace()
    }

    fn version(&self) -> Option<String> {
        self.descriptor().version()
    }

    fn is_enabled(&self) -> bool {
        self.descriptor().is_enabled()
    }

    /// Sets the enabled flag; `process_enabled` runs only on a change.
    fn set_enabled(&self, enabled: bool) {
        if self.descriptor().swap_enabled(enabled) != enabled {
            self.process_enabled(enabled);
        }
    }

    fn server(&self) -> Option<Arc<Server>> {
        self.descriptor().server()
    }

    /// Looks up a connector across the server's engines.
    fn connector(&self, id: &str) -> Option<ConnectorRef> {
        self.server()?.connector(id)
    }

    /// Looks up a connector by its cluster node id.
    fn node(&self, node_id: &str) -> Option<ConnectorRef> {
        self.server()?.node(node_id)
    }

    fn connector_count(&self) -> usize {
        self.server().map_or(0, |server| server.connector_count())
    }

    fn username(&self, connector: &ConnectorRef) -> Option<String> {
        connector.core().username()
    }

    fn set_username(&self, connector: &ConnectorRef, username: &str) {
        connector.core().set_username(username);
    }

    fn remove_username(&self, connector: &ConnectorRef) {
        connector.core().remove_username();
    }

    fn node_id(&self, connector: &ConnectorRef) -> Option<String> {
        connector.core().node_id()
    }

    fn set_node_id(&self, connector: &ConnectorRef, node_id: &str) {
        connector.core().set_node_id(node_id);
    }

    fn remove_node_id(&self, connector: &ConnectorRef) {
        connector.core().remove_node_id();
    }
}

/// Shared handle to a plug-in.
pub type PlugInRef = Arc<dyn PlugIn>;

/// Ordered, copy-on-write list of plug-ins owned by one server.
pub struct PlugInChain {
    server: Weak<Server>,
    plugins: ArcSwap<Vec<PlugInRef>>,
    observer: Arc<dyn DispatchObserver>,
}

impl PlugInChain {
    pub(crate) fn new(server: Weak<Server>, observer: Arc<dyn DispatchObserver>) -> Self {
        Self {
            server,
            plugins: ArcSwap::from_pointee(Vec::new()),
            observer,
        }
    }

    pub fn server(&self) -> Option<Arc<Server>> {
        self.server.upgrade()
    }

    pub fn add_plugin(&self, plugin: PlugInRef) {
        self.insert_plugin(usize::MAX, plugin);
    }

    /// Inserts a plug-in at `position`, clamped to the chain length.
    pub fn insert_plugin(&self, position: usize, plugin: PlugInRef) {
        plugin.descriptor().attach(self.server.clone());
        self.plugins.rcu(|current| {
            let mut next = Vec::clone(current);
            next.insert(position.min(next.len()), plugin.clone());
            next
        });
    }

    pub fn remove_plugin(&self, id: &str) -> Option<PlugInRef> {
        let mut removed = None;
        self.plugins.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = next
                .iter()
                .position(|plugin| plugin.id() == id)
                .map(|index| next.remove(index));
            next
        });
        if let Some(plugin) = &removed {
            plugin.descriptor().detach();
        }
        removed
    }

    pub fn plugin_by_id(&self, id: &str) -> Option<PlugInRef> {
        self.plugins.load().iter().find(|plugin| plugin.id() == id).cloned()
    }

    pub fn plugins(&self) -> Arc<Vec<PlugInRef>> {
        self.plugins.load_full()
    }

    pub fn len(&self) -> usize {
        self.plugins.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.load().is_empty()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Delivered to every plug-in, enabled or not.
    pub async fn engine_started(&self, engine: &Arc<Engine>) {
        for plugin in self.plugins().iter() {
            guarded(
                self.observer.as_ref(),
                Stage::PlugInEngineStarted,
                plugin.id(),
                None,
                plugin.engine_started(engine),
            )
            .await;
        }
    }

    /// Delivered to every plug-in, enabled or not.
    pub async fn engine_stopped(&self, engine: &Arc<Engine>) {
        for plugin in self.plugins().iter() {
            guarded(
                self.observer.as_ref(),
                Stage::PlugInEngineStopped,
                plugin.id(),
                None,
                plugin.engine_stopped(engine),
            )
            .await;
        }
    }

    pub async fn connector_started(&self, connector: &ConnectorRef) {
        for plugin in self.plugins().iter().filter(|plugin| plugin.is_enabled()) {
            guarded(
                self.observer.as_ref(),
                Stage::PlugInConnectorStarted,
                plugin.id(),
                Some(connector.id()),
                plugin.connector_started(connector),
            )
            .await;
        }
    }

    pub async fn connector_stopped(&self, connector: &ConnectorRef, reason: CloseReason) {
        for plugin in self.plugins().iter().filter(|plugin| plugin.is_enabled()) {
            guarded(
                self.observer.as_ref(),
                Stage::PlugInConnectorStopped,
                plugin.id(),
                Some(connector.id()),
                plugin.connector_stopped(connector, reason),
            )
            .await;
        }
    }

    /// Runs enabled plug-ins on a packet until one aborts the chain.
    pub async fn process_packet(&self, connector: &ConnectorRef, packet: &Packet) -> PlugInResponse {
        let mut response = PlugInResponse::new();
        for plugin in self.plugins().iter().filter(|plugin| plugin.is_enabled()) {
            guarded(
                self.observer.as_ref(),
                Stage::PlugInPacket,
                plugin.id(),
                Some(connector.id()),
                plugin.process_packet(&mut response, connector, packet),
            )
            .await;
            if response.is_chain_aborted() {
                debug!(plugin_id = %plugin.id(), connector_id = %connector.id(), "Plug-in chain aborted");
                break;
            }
        }
        response
    }
}

impl fmt::Debug for PlugInChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.plugins.load().iter().map(|plugin| plugin.id().to_string()).collect();
        f.debug_struct("PlugInChain").field("plugins", &ids).finish()
    }
}
