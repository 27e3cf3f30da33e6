//! Relay plug-in: broadcasts every packet to the other connectors of the
//! server.
//!
//! Settings:
//! * `include_sender` (bool, default `false`): also deliver to the sender
//! * `asynchronous` (bool, default `false`): queue sends instead of waiting

use async_trait::async_trait;
use tracing::{debug, info};
use wsplex_core::{
    BroadcastOptions, CloseReason, Connector, ConnectorRef, Descriptor, DispatchError, Packet, PlugIn, PlugInResponse,
};

pub struct RelayPlugIn {
    descriptor: Descriptor,
}

impl RelayPlugIn {
    pub fn new(descriptor: Descriptor) -> Self {
        Self { descriptor }
    }

    fn options(&self) -> BroadcastOptions {
        BroadcastOptions::new()
            .sender_included(self.descriptor.get_bool("include_sender").unwrap_or(false))
            .asynchronous(self.descriptor.get_bool("asynchronous").unwrap_or(false))
    }
}

#[async_trait]
impl PlugIn for RelayPlugIn {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn connector_started(&self, connector: &ConnectorRef) -> Result<(), DispatchError> {
        info!("👋 Connector {} joined relay '{}'", connector.id(), self.id());
        Ok(())
    }

    async fn connector_stopped(&self, connector: &ConnectorRef, reason: CloseReason) -> Result<(), DispatchError> {
        info!("Connector {} left relay '{}' ({})", connector.id(), self.id(), reason);
        Ok(())
    }

    async fn process_packet(
        &self,
        _response: &mut PlugInResponse,
        connector: &ConnectorRef,
        packet: &Packet,
    ) -> Result<(), DispatchError> {
        let server = self
            .server()
            .ok_or_else(|| DispatchError::handler("relay is not attached to a server"))?;
        let outcome = server.broadcast_packet(Some(connector), packet, self.options()).await;
        debug!(
            plugin_id = %self.id(),
            targets = outcome.targets,
            failed = outcome.failed.len(),
            "Relayed packet"
        );
        Ok(())
    }
}
