//! Servers: the application layer on top of one or more engines.
//!
//! A server owns a filter chain, a plug-in chain and a list of listeners, and
//! routes every event it receives from its engines through them. See
//! [`DispatchMode`] for the two routing modes.

mod addressing;
mod broadcast;
mod listener;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{DispatchMode, ServerConfig, ThreadPoolConfig};
use crate::connector::ConnectorRef;
use crate::dispatch::{guarded, DispatchObserver, Stage, TracingObserver};
use crate::engine::Engine;
use crate::error::{ConfigError, DispatchError};
use crate::filter::{FilterChain, FilterRef};
use crate::packet::{CloseReason, Packet};
use crate::plugin::{PlugInChain, PlugInRef};

pub use broadcast::{BroadcastOptions, BroadcastOutcome};
pub use listener::{ListenerRef, ServerEvent, ServerListener};

/// What happened to a packet handed to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// A filter rejected it.
    Rejected,
    /// A plug-in aborted the chain; listeners were skipped.
    Aborted,
    /// It went through the whole pipeline.
    Delivered,
}

/// An application server.
pub struct Server {
    config: ServerConfig,
    engines: DashMap<String, Arc<Engine>>,
    filter_chain: FilterChain,
    plugin_chain: PlugInChain,
    listeners: ArcSwap<Vec<ListenerRef>>,
    observer: Arc<dyn DispatchObserver>,
    alive: AtomicBool,
}

impl Server {
    /// Creates a server that reports dispatch failures through `tracing`.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Creates a server with a custom dispatch observer.
    pub fn with_observer(
        config: ServerConfig,
        observer: Arc<dyn DispatchObserver>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new_cyclic(|server| Self {
            config,
            engines: DashMap::new(),
            filter_chain: FilterChain::new(server.clone(), observer.clone()),
            plugin_chain: PlugInChain::new(server.clone(), observer.clone()),
            listeners: ArcSwap::from_pointee(Vec::new()),
            observer,
            alive: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.config.dispatch
    }

    pub fn thread_pool(&self) -> &ThreadPoolConfig {
        &self.config.thread_pool
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn start_server(&self) {
        if !self.alive.swap(true, Ordering::SeqCst) {
            info!("🎮 Server '{}' started", self.id());
        }
    }

    pub fn stop_server(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!("Server '{}' stopped", self.id());
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Engines
    // ========================================================================

    /// Links an engine in both directions.
    pub fn add_engine(self: &Arc<Self>, engine: &Arc<Engine>) {
        self.engines.insert(engine.id().to_string(), engine.clone());
        engine.add_server(self);
        debug!(server_id = %self.id(), engine_id = %engine.id(), "Engine linked");
    }

    /// Unlinks an engine in both directions.
    pub fn remove_engine(&self, engine_id: &str) -> bool {
        match self.engines.remove(engine_id) {
            Some((_, engine)) => {
                engine.remove_server(self.id());
                true
            }
            None => false,
        }
    }

    pub fn engine(&self, engine_id: &str) -> Option<Arc<Engine>> {
        self.engines.get(engine_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the linked engines.
    pub fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.iter().map(|entry| entry.value().clone()).collect()
    }

    // ========================================================================
    // Chains and listeners
    // ========================================================================

    pub fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    pub fn plugin_chain(&self) -> &PlugInChain {
        &self.plugin_chain
    }

    pub fn filter_by_id(&self, id: &str) -> Option<FilterRef> {
        self.filter_chain.filter_by_id(id)
    }

    pub fn plugin_by_id(&self, id: &str) -> Option<PlugInRef> {
        self.plugin_chain.plugin_by_id(id)
    }

    pub fn add_listener(&self, listener: ListenerRef) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(listener.clone());
            next
        });
    }

    /// Removes a listener by identity.
    pub fn remove_listener(&self, listener: &ListenerRef) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut removed = false;
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.retain(|existing| Arc::as_ptr(existing) as *const () != target);
            removed = next.len() != current.len();
            next
        });
        removed
    }

    pub fn listeners(&self) -> Arc<Vec<ListenerRef>> {
        self.listeners.load_full()
    }

    // ========================================================================
    // Events from engines
    // ========================================================================

    pub async fn engine_started(self: &Arc<Self>, engine: &Arc<Engine>) -> Result<(), DispatchError> {
        self.plugin_chain.engine_started(engine).await;
        Ok(())
    }

    pub async fn engine_stopped(self: &Arc<Self>, engine: &Arc<Engine>) -> Result<(), DispatchError> {
        self.plugin_chain.engine_stopped(engine).await;
        Ok(())
    }

    /// Plug-ins first, then listeners.
    pub async fn connector_started(self: &Arc<Self>, connector: &ConnectorRef) -> Result<(), DispatchError> {
        self.plugin_chain.connector_started(connector).await;
        let event = ServerEvent::new(connector.clone(), self.clone());
        for listener in self.listeners().iter() {
            guarded(
                self.observer.as_ref(),
                Stage::ListenerOpened,
                listener.name(),
                Some(connector.id()),
                listener.process_opened(&event),
            )
            .await;
        }
        Ok(())
    }

    /// Plug-ins first, then listeners.
    pub async fn connector_stopped(
        self: &Arc<Self>,
        connector: &ConnectorRef,
        reason: CloseReason,
    ) -> Result<(), DispatchError> {
        self.plugin_chain.connector_stopped(connector, reason).await;
        let event = ServerEvent::new(connector.clone(), self.clone());
        for listener in self.listeners().iter() {
            guarded(
                self.observer.as_ref(),
                Stage::ListenerClosed,
                listener.name(),
                Some(connector.id()),
                listener.process_closed(&event, reason),
            )
            .await;
        }
        Ok(())
    }

    /// Routes an inbound packet.
    ///
    /// In chained mode: filters, then plug-ins, then listeners, stopping at a
    /// rejection or an abort. In listeners mode: listeners only.
    pub async fn process_packet(self: &Arc<Self>, connector: &ConnectorRef, packet: &Packet) -> Disposition {
        if self.config.dispatch == DispatchMode::Chained {
            if self.filter_chain.process_packet_in(connector, packet).await.is_rejected() {
                return Disposition::Rejected;
            }
            if self.plugin_chain.process_packet(connector, packet).await.is_chain_aborted() {
                return Disposition::Aborted;
            }
        }

        let event = ServerEvent::new(connector.clone(), self.clone());
        for listener in self.listeners().iter() {
            guarded(
                self.observer.as_ref(),
                Stage::ListenerPacket,
                listener.name(),
                Some(connector.id()),
                listener.process_packet(&event, packet),
            )
            .await;
        }
        Disposition::Delivered
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.config.id)
            .field("alive", &self.is_alive())
            .field("engines", &self.engines.len())
            .field("filters", &self.filter_chain)
            .field("plugins", &self.plugin_chain)
            .finish()
    }
}
