//! Echo plug-in: sends every packet back to its sender.

use async_trait::async_trait;
use wsplex_core::{Connector, ConnectorRef, Descriptor, DispatchError, Packet, PlugIn, PlugInResponse};

pub struct EchoPlugIn {
    descriptor: Descriptor,
}

impl EchoPlugIn {
    pub fn new(descriptor: Descriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl PlugIn for EchoPlugIn {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn process_packet(
        &self,
        _response: &mut PlugInResponse,
        connector: &ConnectorRef,
        packet: &Packet,
    ) -> Result<(), DispatchError> {
        connector.send_packet(packet).await?;
        Ok(())
    }
}
