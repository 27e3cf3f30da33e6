//! Filter that rejects inbound packets above a size limit.

use async_trait::async_trait;
use tracing::warn;
use wsplex_core::{Connector, ConnectorRef, Descriptor, DispatchError, Filter, FilterResponse, Packet};

/// Limit used when `max_size` is not configured.
pub const DEFAULT_MAX_SIZE: usize = 65_536;

pub struct PacketSizeFilter {
    descriptor: Descriptor,
    max_size: usize,
}

impl PacketSizeFilter {
    /// Reads the limit from the `max_size` setting.
    pub fn new(descriptor: Descriptor) -> Self {
        let max_size = descriptor
            .get_integer("max_size")
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(DEFAULT_MAX_SIZE);
        Self { descriptor, max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[async_trait]
impl Filter for PacketSizeFilter {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn process_packet_in(
        &self,
        response: &mut FilterResponse,
        connector: &ConnectorRef,
        packet: &Packet,
    ) -> Result<(), DispatchError> {
        if packet.len() > self.max_size {
            warn!(
                connector_id = %connector.id(),
                size = packet.len(),
                max_size = self.max_size,
                "Rejecting oversized packet"
            );
            response.reject_message();
        }
        Ok(())
    }
}
