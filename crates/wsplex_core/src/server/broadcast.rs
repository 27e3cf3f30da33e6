//! Sending and broadcasting on behalf of a server.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use super::{Disposition, Server};
use crate::connector::ConnectorRef;
use crate::error::SendError;
use crate::io_future::IoFuture;
use crate::packet::Packet;

/// Options for [`Server::broadcast_packet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Also deliver to the source connector.
    pub sender_included: bool,
    /// Queue the sends and return their futures instead of waiting.
    pub asynchronous: bool,
}

impl BroadcastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender_included(mut self, included: bool) -> Self {
        self.sender_included = included;
        self
    }

    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }
}

/// What a broadcast did.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Number of targets the packet was addressed to.
    pub targets: usize,
    /// Synchronous deliveries that succeeded.
    pub delivered: usize,
    /// Synchronous deliveries that failed, by connector id.
    pub failed: Vec<(String, SendError)>,
    /// Futures for asynchronous sends.
    pub pending: Vec<IoFuture>,
}

impl Server {
    /// Sends a packet to one connector and waits for the write.
    pub async fn send_packet(&self, connector: &ConnectorRef, packet: &Packet) -> Result<(), SendError> {
        connector.send_packet(packet).await
    }

    /// Queues a packet for one connector.
    pub fn send_packet_async(&self, connector: &ConnectorRef, packet: Packet) -> IoFuture {
        connector.send_packet_async(packet)
    }

    /// Sends a packet after running the outbound filters.
    ///
    /// # Returns
    /// * `Ok(Disposition::Rejected)` if a filter vetoed the packet
    /// * `Ok(Disposition::Delivered)` once written
    pub async fn send_packet_filtered(
        &self,
        source: Option<&ConnectorRef>,
        target: &ConnectorRef,
        packet: &Packet,
    ) -> Result<Disposition, SendError> {
        let response = self.filter_chain().process_packet_out(source, target, packet).await;
        if response.is_rejected() {
            return Ok(Disposition::Rejected);
        }
        target.send_packet(packet).await?;
        Ok(Disposition::Delivered)
    }

    /// Sends a packet to every connector of every engine of this server.
    ///
    /// The source connector is skipped unless `sender_included` is set. Each
    /// delivery is independent: one failing target does not stop the others.
    pub async fn broadcast_packet(
        self: &Arc<Self>,
        source: Option<&ConnectorRef>,
        packet: &Packet,
        options: BroadcastOptions,
    ) -> BroadcastOutcome {
        let source_id = source.map(|connector| connector.id().to_string());
        let targets: Vec<ConnectorRef> = self
            .all_connectors()
            .into_values()
            .filter(|connector| options.sender_included || Some(connector.id()) != source_id.as_deref())
            .collect();

        let mut outcome = BroadcastOutcome {
            targets: targets.len(),
            ..BroadcastOutcome::default()
        };
        debug!(server_id = %self.id(), targets = outcome.targets, "Broadcasting packet");

        if options.asynchronous {
            outcome.pending = targets
                .iter()
                .map(|connector| connector.send_packet_async(packet.clone()))
                .collect();
            return outcome;
        }

        let mut sends: FuturesUnordered<_> = targets
            .into_iter()
            .map(|connector| async move {
                let result = connector.send_packet(packet).await;
                (connector, result)
            })
            .collect();

        while let Some((connector, result)) = sends.next().await {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(server_id = %self.id(), connector_id = %connector.id(), "Broadcast delivery failed: {}", e);
                    outcome.failed.push((connector.id().to_string(), e));
                }
            }
        }
        outcome
    }
}
