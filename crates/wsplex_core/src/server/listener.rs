//! Server listeners.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::Server;
use crate::connector::ConnectorRef;
use crate::error::{DispatchError, SendError};
use crate::packet::{CloseReason, Packet};

/// Context handed to listeners: the connector an event concerns and the
/// server that dispatched it.
#[derive(Clone)]
pub struct ServerEvent {
    connector: ConnectorRef,
    server: Arc<Server>,
}

impl ServerEvent {
    pub fn new(connector: ConnectorRef, server: Arc<Server>) -> Self {
        Self { connector, server }
    }

    pub fn connector(&self) -> &ConnectorRef {
        &self.connector
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Replies to the connector this event concerns.
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), SendError> {
        self.server.send_packet(&self.connector, packet).await
    }
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEvent")
            .field("connector", &self.connector.id())
            .field("server", &self.server.id())
            .finish()
    }
}

/// Observer of connector activity on a server.
///
/// Listeners run after the plug-in chain in chained dispatch mode, or alone in
/// listeners-only mode.
#[async_trait]
pub trait ServerListener: Send + Sync {
    /// Name used when reporting failures.
    fn name(&self) -> &str {
        "listener"
    }

    async fn process_opened(&self, _event: &ServerEvent) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn process_packet(&self, _event: &ServerEvent, _packet: &Packet) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn process_closed(&self, _event: &ServerEvent, _reason: CloseReason) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Shared handle to a listener.
pub type ListenerRef = Arc<dyn ServerListener>;
