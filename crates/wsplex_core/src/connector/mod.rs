//! Connectors: one per live client connection.
//!
//! A transport implements [`Connector`] for its connection type and embeds a
//! [`ConnectorCore`] for the shared state. Lifecycle operations are provided by
//! [`ConnectorLifecycle`], which is implemented for every [`ConnectorRef`].

pub mod state;
pub mod header;
pub mod vars;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CoreError, SendError};
use crate::io_future::IoFuture;
use crate::packet::{CloseReason, Packet};

pub use state::{ConnectorCore, ConnectorStatus, DEFAULT_PROTOCOL_VERSION};
pub use header::RequestHeader;
pub use vars::{VarMatcher, VariableBag, VAR_NODE_ID, VAR_SUBPROTOCOL, VAR_USERNAME, VAR_VERSION};

/// Shared handle to a connector.
pub type ConnectorRef = Arc<dyn Connector>;

/// A single client connection as seen by engines, servers and plug-ins.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Shared connector state.
    fn core(&self) -> &ConnectorCore;

    /// Writes one packet to the transport.
    ///
    /// Called with the write lock held; implementations do not lock again.
    async fn write_packet(&self, packet: &Packet) -> Result<(), SendError>;

    /// Queues `packet` and returns at once.
    ///
    /// The returned future completes when the transport has written the packet
    /// or failed to. Writes queued this way are ordered with synchronous sends.
    fn send_packet_async(&self, packet: Packet) -> IoFuture;

    /// Tears down the transport connection. Called once, after the engine has
    /// been told the connector stopped.
    async fn close(&self, _reason: CloseReason) {}

    fn id(&self) -> &str {
        self.core().id()
    }

    /// Sends one packet and waits for the write to finish.
    async fn send_packet(&self, packet: &Packet) -> Result<(), SendError> {
        let _write = self.core().write_lock().lock().await;
        self.write_packet(packet).await
    }

    /// Sends several packets with no other write interleaved.
    ///
    /// Stops at the first failed write.
    async fn send_packets(&self, packets: &[Packet]) -> Result<(), SendError> {
        let _write = self.core().write_lock().lock().await;
        for packet in packets {
            self.write_packet(packet).await?;
        }
        Ok(())
    }
}

/// Start, stop and inbound processing for connectors owned by an engine.
#[async_trait]
pub trait ConnectorLifecycle {
    /// Reports the connector as started to its engine.
    async fn start_connector(&self) -> Result<(), CoreError>;

    /// Stops the connector: notifies the engine, then closes the transport.
    ///
    /// Only the first call has any effect.
    async fn stop_connector(&self, reason: CloseReason);

    /// Hands an inbound packet to the engine under the read lock.
    async fn process_packet(&self, packet: Packet);
}

#[async_trait]
impl ConnectorLifecycle for ConnectorRef {
    async fn start_connector(&self) -> Result<(), CoreError> {
        match self.core().engine() {
            Some(engine) => engine.connector_started(self).await,
            None => Err(CoreError::EngineNotRunning(self.id().to_string())),
        }
    }

    async fn stop_connector(&self, reason: CloseReason) {
        let first = match self.core().engine() {
            Some(engine) => engine.connector_stopped(self, reason).await,
            None => self.core().mark_stopped(),
        };
        if first {
            self.close(reason).await;
        }
    }

    async fn process_packet(&self, packet: Packet) {
        let _read = self.core().read_lock().lock().await;
        match self.core().engine() {
            Some(engine) => engine.process_packet(self, &packet).await,
            None => debug!(connector_id = %self.id(), "Dropping packet for detached connector"),
        }
    }
}
