//! Filters and the filter chain.
//!
//! Filters see inbound packets before any plug-in and can veto them. The chain
//! runs enabled filters in order and stops at the first rejection. Outbound
//! filtering works the same way for packets sent through
//! [`Server::send_packet_filtered`](crate::Server::send_packet_filtered).

use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::debug;

use crate::connector::ConnectorRef;
use crate::descriptor::Descriptor;
use crate::dispatch::{guarded, DispatchObserver, Stage};
use crate::error::DispatchError;
use crate::packet::Packet;
use crate::server::Server;

/// Result of one filter chain traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterResponse {
    rejected: bool,
}

impl FilterResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vetoes the packet. Remaining filters are skipped.
    pub fn reject_message(&mut self) {
        self.rejected = true;
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }
}

/// A packet filter.
///
/// Both hooks default to letting the packet through.
#[async_trait]
pub trait Filter: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    /// Inspects an inbound packet from `connector`.
    async fn process_packet_in(
        &self,
        _response: &mut FilterResponse,
        _connector: &ConnectorRef,
        _packet: &Packet,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Inspects an outbound packet to `target`. `source` is the connector the
    /// packet originated from, if any.
    async fn process_packet_out(
        &self,
        _response: &mut FilterResponse,
        _source: Option<&ConnectorRef>,
        _target: &ConnectorRef,
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

    fn is_enabled(&self) -> bool {
        self.descriptor().is_enabled()
    }

    /// Sets the enabled flag; `process_enabled` runs only on a change.
    fn set_enabled(&self, enabled: bool) {
        if self.descriptor().swap_enabled(enabled) != enabled {
            self.process_enabled(enabled);
        }
    }

    /// The server this filter belongs to.
    fn server(&self) -> Option<Arc<Server>> {
        self.descriptor().server()
    }
}

/// Shared handle to a filter.
pub type FilterRef = Arc<dyn Filter>;

/// Ordered, copy-on-write list of filters owned by one server.
///
/// Traversals work on the list as it was when they started; concurrent
/// additions and removals take effect for the next traversal.
pub struct FilterChain {
    server: Weak<Server>,
    filters: ArcSwap<Vec<FilterRef>>,
    observer: Arc<dyn DispatchObserver>,
}

impl FilterChain {
    pub(crate) fn new(server: Weak<Server>, observer: Arc<dyn DispatchObserver>) -> Self {
        Self {
            server,
            filters: ArcSwap::from_pointee(Vec::new()),
            observer,
        }
    }

    pub fn server(&self) -> Option<Arc<Server>> {
        self.server.upgrade()
    }

    /// Appends a filter and attaches it to this chain's server.
    pub fn add_filter(&self, filter: FilterRef) {
        self.insert_filter(usize::MAX, filter);
    }

    /// Inserts a filter at `position`, clamped to the chain length.
    pub fn insert_filter(&self, position: usize, filter: FilterRef) {
        filter.descriptor().attach(self.server.clone());
        self.filters.rcu(|current| {
            let mut next = Vec::clone(current);
            next.insert(position.min(next.len()), filter.clone());
            next
        });
    }

    /// Removes the filter with `id` and detaches it from the server.
    pub fn remove_filter(&self, id: &str) -> Option<FilterRef> {
        let mut removed = None;
        self.filters.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = next
                .iter()
                .position(|filter| filter.id() == id)
                .map(|index| next.remove(index));
            next
        });
        if let Some(filter) = &removed {
            filter.descriptor().detach();
        }
        removed
    }

    pub fn filter_by_id(&self, id: &str) -> Option<FilterRef> {
        self.filters.load().iter().find(|filter| filter.id() == id).cloned()
    }

    /// Snapshot of the chain in order.
    pub fn filters(&self) -> Arc<Vec<FilterRef>> {
        self.filters.load_full()
    }

    pub fn len(&self) -> usize {
        self.filters.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.load().is_empty()
    }

    /// Runs enabled filters on an inbound packet until one rejects it.
    ///
    /// A filter that fails is reported and treated as not rejecting.
    pub async fn process_packet_in(&self, connector: &ConnectorRef, packet: &Packet) -> FilterResponse {
        let mut response = FilterResponse::new();
        for filter in self.filters().iter().filter(|filter| filter.is_enabled()) {
            let mut verdict = FilterResponse::new();
            let completed = guarded(
                self.observer.as_ref(),
                Stage::FilterIn,
                filter.id(),
                Some(connector.id()),
                filter.process_packet_in(&mut verdict, connector, packet),
            )
            .await;
            if completed && verdict.is_rejected() {
                debug!(filter_id = %filter.id(), connector_id = %connector.id(), "Inbound packet rejected");
                response.reject_message();
                break;
            }
        }
        response
    }

    /// Runs enabled filters on an outbound packet until one rejects it.
    pub async fn process_packet_out(
        &self,
        source: Option<&ConnectorRef>,
        target: &ConnectorRef,
        packet: &Packet,
    ) -> FilterResponse {
        let mut response = FilterResponse::new();
        for filter in self.filters().iter().filter(|filter| filter.is_enabled()) {
            let mut verdict = FilterResponse::new();
            let completed = guarded(
                self.observer.as_ref(),
                Stage::FilterOut,
                filter.id(),
                Some(target.id()),
                filter.process_packet_out(&mut verdict, source, target, packet),
            )
            .await;
            if completed && verdict.is_rejected() {
                debug!(filter_id = %filter.id(), connector_id = %target.id(), "Outbound packet rejected");
                response.reject_message();
                break;
            }
        }
        response
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.filters.load().iter().map(|filter| filter.id().to_string()).collect();
        f.debug_struct("FilterChain").field("filters", &ids).finish()
    }
}
