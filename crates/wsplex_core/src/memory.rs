//! In-process transport.
//!
//! Connections are opened with [`MemoryTransport::connect`] and record every
//! packet written to them. Used for embedding the core without a network and
//! for tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{Connector, ConnectorCore, ConnectorLifecycle, ConnectorRef};
use crate::engine::{Engine, Transport};
use crate::error::{CoreError, SendError};
use crate::io_future::IoFuture;
use crate::packet::{CloseReason, Packet};

/// Transport with no network endpoint.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    running: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Opens a connection on `engine` and starts it.
    ///
    /// # Errors
    /// * `EngineNotRunning` if the engine has not been started
    pub async fn connect(engine: &Arc<Engine>, remote_addr: SocketAddr) -> Result<Arc<MemoryConnector>, CoreError> {
        let connector = Arc::new(MemoryConnector::new(engine, remote_addr));
        let handle: ConnectorRef = connector.clone();
        engine.register_connector(&handle).await?;
        Ok(connector)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self, _engine: &Arc<Engine>) -> Result<(), CoreError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _engine: &Arc<Engine>) -> Result<(), CoreError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector backed by an in-memory outbox.
#[derive(Debug)]
pub struct MemoryConnector {
    core: ConnectorCore,
    outbox: Mutex<Vec<Packet>>,
    closed: Mutex<Option<CloseReason>>,
    fail_writes: AtomicBool,
}

impl MemoryConnector {
    pub fn new(engine: &Arc<Engine>, remote_addr: SocketAddr) -> Self {
        Self {
            core: ConnectorCore::new(engine, Some(remote_addr)),
            outbox: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Packets written so far, in order.
    pub fn sent(&self) -> Vec<Packet> {
        self.outbox.lock().clone()
    }

    /// Drains the outbox.
    pub fn take_sent(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// Reason the connector was closed with, once closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }

    /// Makes every following write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delivers an inbound packet as if the client had sent it.
    pub async fn receive(self: &Arc<Self>, packet: Packet) {
        let handle: ConnectorRef = self.clone();
        handle.process_packet(packet).await;
    }

    /// Stops the connector as if the client had gone away.
    pub async fn disconnect(self: &Arc<Self>, reason: CloseReason) {
        let handle: ConnectorRef = self.clone();
        handle.stop_connector(reason).await;
    }

    fn write(&self, packet: &Packet) -> Result<(), SendError> {
        if self.closed.lock().is_some() {
            return Err(SendError::NotConnected(self.core.id().to_string()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SendError::Undeliverable {
                connector_id: self.core.id().to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        self.outbox.lock().push(packet.clone());
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), SendError> {
        self.write(packet)
    }

    /// Completes before returning; the outbox write is the whole transfer.
    fn send_packet_async(&self, packet: Packet) -> IoFuture {
        let future = IoFuture::new(self.core.id());
        match self.write(&packet) {
            Ok(()) => future.set_success(),
            Err(e) => future.set_failure(e),
        };
        future
    }

    async fn close(&self, reason: CloseReason) {
        *self.closed.lock() = Some(reason);
    }
}
