//! State shared by every connector implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::header::{RequestHeader, ARG_UNID};
use super::vars::{VariableBag, VAR_NODE_ID, VAR_SUBPROTOCOL, VAR_USERNAME};
use crate::engine::Engine;
use crate::packet::CloseReason;

/// Default protocol version (RFC 6455).
pub const DEFAULT_PROTOCOL_VERSION: u32 = 13;

static CONNECTOR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connection status of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorStatus {
    Down,
    Up,
}

/// Where a connector is in its start and stop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Starting,
    Started,
    /// Stopped while the start notification was still running.
    StopDeferred(CloseReason),
    Stopped,
}

/// What a stop has to do, decided by [`ConnectorCore::begin_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopStep {
    /// The start was delivered: deliver the stop.
    Notify,
    /// The start is being delivered and will deliver the stop after it.
    Deferred,
    /// No start was delivered: nothing to notify.
    Unstarted,
}

/// Identity, variables, handshake data and I/O locks of a connector.
///
/// Transports embed one of these and return it from
/// [`Connector::core`](super::Connector::core).
#[derive(Debug)]
pub struct ConnectorCore {
    engine: Weak<Engine>,
    node_id: Option<String>,
    remote_addr: Option<SocketAddr>,
    id: OnceLock<String>,
    up: AtomicBool,
    stopped: AtomicBool,
    phase: parking_lot::Mutex<Phase>,
    version: AtomicU32,
    ssl: AtomicBool,
    header: RwLock<Option<RequestHeader>>,
    vars: VariableBag,
    read_lock: Arc<Mutex<()>>,
    write_lock: Arc<Mutex<()>>,
}

impl ConnectorCore {
    /// Creates the state for a connector owned by `engine`.
    pub fn new(engine: &Arc<Engine>, remote_addr: Option<SocketAddr>) -> Self {
        let mut core = Self::detached(remote_addr);
        core.engine = Arc::downgrade(engine);
        core.node_id = engine.node_id().map(str::to_string);
        core
    }

    /// Creates state with no owning engine.
    pub fn detached(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            engine: Weak::new(),
            node_id: None,
            remote_addr,
            id: OnceLock::new(),
            up: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            phase: parking_lot::Mutex::new(Phase::Pending),
            version: AtomicU32::new(DEFAULT_PROTOCOL_VERSION),
            ssl: AtomicBool::new(false),
            header: RwLock::new(None),
            vars: VariableBag::new(),
            read_lock: Arc::new(Mutex::new(())),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Stable connector id, generated on first use.
    ///
    /// Format: `[<node id>.]<remote port>.<counter>`, with `-1` for an unknown
    /// port. The counter is process-wide, so ids are unique within a process.
    pub fn id(&self) -> &str {
        self.id.get_or_init(|| {
            let port = self.remote_port().map_or(-1, i32::from);
            let sequence = CONNECTOR_COUNTER.fetch_add(1, Ordering::Relaxed);
            match &self.node_id {
                Some(node) => format!("{node}.{port}.{sequence}"),
                None => format!("{port}.{sequence}"),
            }
        })
    }

    /// The owning engine, if it is still alive.
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.upgrade()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_addr.map(|addr| addr.port())
    }

    pub fn remote_host(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    pub fn status(&self) -> ConnectorStatus {
        if self.up.load(Ordering::SeqCst) {
            ConnectorStatus::Up
        } else {
            ConnectorStatus::Down
        }
    }

    pub fn set_status(&self, status: ConnectorStatus) {
        self.up.store(status == ConnectorStatus::Up, Ordering::SeqCst);
    }

    /// Marks the connector stopped. Returns `true` only for the first call.
    pub(crate) fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Claims the start notification. Returns `false` if the connector was
    /// already started or stopped.
    pub(crate) fn begin_start(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::Pending {
            return false;
        }
        *phase = Phase::Starting;
        true
    }

    /// Ends the start notification. Returns the close reason of a stop that
    /// arrived meanwhile.
    pub(crate) fn finish_start(&self) -> Option<CloseReason> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Starting => {
                *phase = Phase::Started;
                None
            }
            Phase::StopDeferred(reason) => {
                *phase = Phase::Stopped;
                Some(reason)
            }
            Phase::Pending | Phase::Started | Phase::Stopped => None,
        }
    }

    pub(crate) fn begin_stop(&self, reason: CloseReason) -> StopStep {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Starting => {
                *phase = Phase::StopDeferred(reason);
                StopStep::Deferred
            }
            Phase::Started => {
                *phase = Phase::Stopped;
                StopStep::Notify
            }
            Phase::Pending | Phase::StopDeferred(_) | Phase::Stopped => {
                *phase = Phase::Stopped;
                StopStep::Unstarted
            }
        }
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::SeqCst);
    }

    /// Draft-75/76 handshake.
    pub fn is_hixie(&self) -> bool {
        matches!(self.version(), 75 | 76)
    }

    /// Hybi drafts and RFC 6455.
    pub fn is_hybi(&self) -> bool {
        (1..=17).contains(&self.version())
    }

    pub fn is_ssl(&self) -> bool {
        self.ssl.load(Ordering::SeqCst)
    }

    pub fn set_ssl(&self, ssl: bool) {
        self.ssl.store(ssl, Ordering::SeqCst);
    }

    pub fn header(&self) -> Option<RequestHeader> {
        self.header.read().clone()
    }

    /// Stores the handshake header.
    ///
    /// A `unid` URL argument is moved into the node-id variable and removed from
    /// the stored arguments.
    pub fn set_header(&self, mut header: RequestHeader) {
        if let Some(node_id) = header.remove_arg(ARG_UNID) {
            if !node_id.is_empty() {
                self.set_node_id(node_id);
            }
        }
        if let Some(version) = header.version() {
            self.set_version(version);
        }
        *self.header.write() = Some(header);
    }

    // ========================================================================
    // Variables
    // ========================================================================

    pub fn vars(&self) -> &VariableBag {
        &self.vars
    }

    pub fn username(&self) -> Option<String> {
        self.vars.get_string(VAR_USERNAME)
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.vars.set_string(VAR_USERNAME, username);
    }

    pub fn remove_username(&self) {
        self.vars.remove(VAR_USERNAME);
    }

    pub fn subprotocol(&self) -> Option<String> {
        self.vars.get_string(VAR_SUBPROTOCOL)
    }

    pub fn set_subprotocol(&self, subprotocol: impl Into<String>) {
        self.vars.set_string(VAR_SUBPROTOCOL, subprotocol);
    }

    pub fn node_id(&self) -> Option<String> {
        self.vars.get_string(VAR_NODE_ID)
    }

    pub fn set_node_id(&self, node_id: impl Into<String>) {
        self.vars.set_string(VAR_NODE_ID, node_id);
    }

    pub fn remove_node_id(&self) {
        self.vars.remove(VAR_NODE_ID);
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Serializes inbound processing for this connector.
    pub fn read_lock(&self) -> &Arc<Mutex<()>> {
        &self.read_lock
    }

    /// Serializes outbound writes for this connector.
    pub fn write_lock(&self) -> &Arc<Mutex<()>> {
        &self.write_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_id_is_lazy_and_stable() {
        let core = ConnectorCore::detached(Some(addr(4100)));
        let id = core.id().to_string();
        assert!(id.starts_with("4100."));
        assert_eq!(core.id(), id);

        let other = ConnectorCore::detached(Some(addr(4100)));
        assert_ne!(other.id(), id);
    }

    #[test]
    fn test_id_without_address() {
        let core = ConnectorCore::detached(None);
        assert!(core.id().starts_with("-1."));
    }

    #[test]
    fn test_unid_moves_into_node_id() {
        let core = ConnectorCore::detached(Some(addr(4101)));
        let header = RequestHeader::from_request("/ws", Some("unid=node-3&room=lobby"));
        core.set_header(header);

        assert_eq!(core.node_id(), Some("node-3".to_string()));
        let stored = core.header().expect("Failed to store header");
        assert_eq!(stored.arg(ARG_UNID), None);
        assert_eq!(stored.arg("room"), Some("lobby"));
    }

    #[test]
    fn test_protocol_families() {
        let core = ConnectorCore::detached(None);
        assert_eq!(core.version(), DEFAULT_PROTOCOL_VERSION);
        assert!(core.is_hybi());
        assert!(!core.is_hixie());

        core.set_version(76);
        assert!(core.is_hixie());
        assert!(!core.is_hybi());

        core.set_header(RequestHeader::new("/").with_field("Sec-WebSocket-Version", "8"));
        assert_eq!(core.version(), 8);
    }

    #[test]
    fn test_stop_marker_is_once() {
        let core = ConnectorCore::detached(None);
        assert!(core.mark_stopped());
        assert!(!core.mark_stopped());
        assert!(core.is_stopped());
    }

    #[test]
    fn test_stop_during_start_is_deferred() {
        let core = ConnectorCore::detached(None);
        assert!(core.begin_start());
        assert_eq!(core.begin_stop(CloseReason::Broken), StopStep::Deferred);
        assert_eq!(core.finish_start(), Some(CloseReason::Broken));
        assert!(!core.begin_start());
    }

    #[test]
    fn test_stop_phases() {
        let started = ConnectorCore::detached(None);
        assert!(started.begin_start());
        assert_eq!(started.finish_start(), None);
        assert_eq!(started.begin_stop(CloseReason::Client), StopStep::Notify);

        let unstarted = ConnectorCore::detached(None);
        assert_eq!(unstarted.begin_stop(CloseReason::Client), StopStep::Unstarted);
        assert!(!unstarted.begin_start());
    }

    #[test]
    fn test_username_helpers() {
        let core = ConnectorCore::detached(None);
        assert_eq!(core.username(), None);
        core.set_username("alice");
        assert_eq!(core.username(), Some("alice".to_string()));
        core.remove_username();
        assert_eq!(core.username(), None);
    }
}
