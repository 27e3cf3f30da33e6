//! WebSocket over TCP.
//!
//! The accept loop performs the opening handshake with tokio-tungstenite,
//! enforces the engine's origin list and connection limit, then gives each
//! connection a reader task and a writer task. All writes for a connection go
//! through its writer task, so synchronous and queued sends share one order.
//! A queued send that finds the write lock taken is parked and handed to the
//! writer by the next lock holder, ahead of that holder's own packets.
//!
//! Ping and pong frames never reach servers: tungstenite answers pings itself
//! while the reader polls the stream.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use wsplex_core::{
    CloseReason, Connector, ConnectorCore, ConnectorLifecycle, ConnectorRef, CoreError, Engine, FrameType, IoFuture,
    MaxConnectionsStrategy, Packet, SendError, Transport,
};

use super::handshake::{admission, refusal, request_header, Admission, OriginPolicy};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Poll interval of the `wait` max-connections strategy.
const CAPACITY_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Transport
// ============================================================================

/// TCP listener for one engine.
#[derive(Debug)]
pub struct TcpTransport {
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

fn bind(engine_id: &str, addr: SocketAddr) -> Result<TcpListener, CoreError> {
    let network = |reason: String| CoreError::Transport {
        engine_id: engine_id.to_string(),
        reason,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();
    socket
        .bind(&addr.into())
        .map_err(|e| network(format!("Bind failed: {e}")))?;
    socket
        .listen(1024)
        .map_err(|e| network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener).map_err(|e| network(format!("Tokio listener creation failed: {e}")))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self, engine: &Arc<Engine>) -> Result<(), CoreError> {
        let port = engine.config().port.ok_or_else(|| CoreError::Transport {
            engine_id: engine.id().to_string(),
            reason: "no port configured".to_string(),
        })?;
        let listener = bind(engine.id(), SocketAddr::from(([0, 0, 0, 0], port)))?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!("✅ Engine '{}' listening on {}", engine.id(), local_addr);

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let engine = engine.clone();
        let origins = Arc::new(OriginPolicy::new(&engine.config().domains));

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            let engine = engine.clone();
                            let origins = origins.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(engine, origins, stream, addr).await {
                                    debug!("Connection from {} ended with error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => warn!("Failed to accept connection: {}", e),
                    },
                }
            }
            debug!(engine_id = %engine.id(), "Accept loop finished");
        });
        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self, engine: &Arc<Engine>) -> Result<(), CoreError> {
        self.shutdown.send_replace(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(engine_id = %engine.id(), "Accept loop panicked: {}", e);
            }
        }
        *self.local_addr.lock() = None;
        Ok(())
    }
}

// ============================================================================
// Connection handling
// ============================================================================

async fn wait_for_capacity(engine: &Engine) -> bool {
    while engine.is_at_capacity() {
        if !engine.is_alive() {
            return false;
        }
        tokio::time::sleep(CAPACITY_POLL_INTERVAL).await;
    }
    true
}

async fn handle_connection(
    engine: Arc<Engine>,
    origins: Arc<OriginPolicy>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), CoreError> {
    if engine.on_max_connections_strategy() == MaxConnectionsStrategy::Wait && !wait_for_capacity(&engine).await {
        return Ok(());
    }
    let admitted = admission(&engine);

    let mut captured = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let header = request_header(request);
        if !origins.allows(header.origin()) {
            warn!(engine_id = %engine.id(), "Rejected handshake from {}: origin {:?} not allowed", addr, header.origin());
            return Err(refusal(StatusCode::FORBIDDEN, None, "Origin not allowed"));
        }
        if let Admission::Refuse { status, location } = &admitted {
            info!(engine_id = %engine.id(), "Refusing {}: max connections reached", addr);
            return Err(refusal(*status, location.as_deref(), "Max connections reached"));
        }
        if let Some(value) = header.subprotocol().and_then(|p| HeaderValue::from_str(p).ok()) {
            response.headers_mut().insert("sec-websocket-protocol", value);
        }
        captured = Some(header);
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback).await.map_err(|e| CoreError::Transport {
        engine_id: engine.id().to_string(),
        reason: format!("WebSocket handshake failed for {addr}: {e}"),
    })?;
    let (sink, receiver) = ws_stream.split();

    let (outbound, queue) = mpsc::unbounded_channel();
    let connector = Arc::new(TcpConnector {
        core: ConnectorCore::new(&engine, Some(addr)),
        outlet: Arc::new(Outlet::new(outbound)),
    });
    if let Some(header) = captured {
        if let Some(subprotocol) = header.subprotocol() {
            connector.core.set_subprotocol(subprotocol);
        }
        connector.core.set_header(header);
    }
    tokio::spawn(write_loop(sink, queue, connector.core.id().to_string()));

    let handle: ConnectorRef = connector;
    if admitted == Admission::AcceptThenClose {
        info!(engine_id = %engine.id(), "Closing {}: max connections reached", addr);
        handle.close(CloseReason::Server).await;
        return Ok(());
    }

    engine.register_connector(&handle).await?;
    let reason = read_loop(&engine, &handle, receiver).await;
    handle.stop_connector(reason).await;
    Ok(())
}

async fn read_loop(engine: &Engine, connector: &ConnectorRef, mut receiver: WsReceiver) -> CloseReason {
    loop {
        let next = match engine.session_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, receiver.next()).await {
                Ok(next) => next,
                Err(_) => return CloseReason::Timeout,
            },
            None => receiver.next().await,
        };

        let packet = match next {
            None => return CloseReason::Broken,
            Some(Err(e)) => {
                debug!(connector_id = %connector.id(), "Read failed: {}", e);
                return CloseReason::Broken;
            }
            Some(Ok(Message::Close(_))) => return CloseReason::Client,
            Some(Ok(Message::Text(text))) => Packet::text(text.as_str()),
            Some(Ok(Message::Binary(data))) => Packet::binary(data.to_vec()),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
        };

        if packet.len() > engine.max_frame_size() {
            warn!(connector_id = %connector.id(), size = packet.len(), "Frame exceeds max frame size");
            return CloseReason::Broken;
        }
        connector.process_packet(packet).await;
    }
}

// ============================================================================
// Connector
// ============================================================================

enum Completion {
    Ack(oneshot::Sender<Result<(), SendError>>),
    Future(IoFuture),
}

impl Completion {
    fn complete(self, result: Result<(), SendError>) {
        match self {
            Completion::Ack(ack) => {
                let _ = ack.send(result);
            }
            Completion::Future(future) => {
                match result {
                    Ok(()) => future.set_success(),
                    Err(e) => future.set_failure(e),
                };
            }
        }
    }
}

enum Outbound {
    Packet { packet: Packet, done: Completion },
    Close(CloseReason),
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::Server => CloseCode::Policy,
        CloseReason::Shutdown | CloseReason::Timeout => CloseCode::Away,
        CloseReason::Client | CloseReason::Broken => CloseCode::Normal,
    };
    CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason.as_str()),
    }
}

fn to_message(packet: Packet) -> Message {
    match packet.frame_type() {
        FrameType::Text => Message::text(String::from_utf8_lossy(packet.data()).into_owned()),
        FrameType::Binary => Message::binary(packet.into_data()),
        FrameType::Ping => Message::Ping(packet.into_data().into()),
        FrameType::Pong => Message::Pong(packet.into_data().into()),
        FrameType::Close => Message::Close(None),
    }
}

async fn write_loop(mut sink: WsSink, mut queue: mpsc::UnboundedReceiver<Outbound>, connector_id: String) {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Packet { packet, done } => {
                let result = sink.send(to_message(packet)).await.map_err(|e| SendError::Undeliverable {
                    connector_id: connector_id.clone(),
                    reason: e.to_string(),
                });
                done.complete(result);
            }
            Outbound::Close(reason) => {
                let _ = sink.send(Message::Close(Some(close_frame(reason)))).await;
                let _ = sink.close().await;
                break;
            }
        }
    }

    queue.close();
    while let Ok(item) = queue.try_recv() {
        if let Outbound::Packet { done, .. } = item {
            done.complete(Err(SendError::NotConnected(connector_id.clone())));
        }
    }
}

/// Queued sends that found the write lock taken.
#[derive(Default)]
struct Parked {
    packets: VecDeque<(Packet, IoFuture)>,
    draining: bool,
}

/// Sending side of a connection's writer queue.
struct Outlet {
    sender: mpsc::UnboundedSender<Outbound>,
    parked: Mutex<Parked>,
}

impl Outlet {
    fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            sender,
            parked: Mutex::new(Parked::default()),
        }
    }

    fn push(&self, connector_id: &str, packet: Packet, done: Completion) {
        if let Err(mpsc::error::SendError(Outbound::Packet { done, .. })) =
            self.sender.send(Outbound::Packet { packet, done })
        {
            done.complete(Err(SendError::NotConnected(connector_id.to_string())));
        }
    }

    /// Hands every parked send to the writer, oldest first.
    ///
    /// The caller holds the connector's write lock.
    fn flush(&self, connector_id: &str) {
        let parked = std::mem::take(&mut self.parked.lock().packets);
        for (packet, future) in parked {
            self.push(connector_id, packet, Completion::Future(future));
        }
    }

    /// Flushes until nothing is parked, then clears the draining flag.
    async fn drain(self: Arc<Self>, write_lock: Arc<tokio::sync::Mutex<()>>, connector_id: String) {
        let _write = write_lock.lock_owned().await;
        loop {
            let batch = {
                let mut parked = self.parked.lock();
                if parked.packets.is_empty() {
                    parked.draining = false;
                    return;
                }
                std::mem::take(&mut parked.packets)
            };
            for (packet, future) in batch {
                self.push(&connector_id, packet, Completion::Future(future));
            }
        }
    }
}

impl std::fmt::Debug for Outlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet")
            .field("parked", &self.parked.lock().packets.len())
            .finish()
    }
}

/// Connector for one TCP WebSocket connection.
#[derive(Debug)]
pub struct TcpConnector {
    core: ConnectorCore,
    outlet: Arc<Outlet>,
}

#[async_trait]
impl Connector for TcpConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), SendError> {
        let (ack, written) = oneshot::channel();
        self.outlet.flush(self.core.id());
        self.outlet.push(self.core.id(), packet.clone(), Completion::Ack(ack));
        written
            .await
            .unwrap_or_else(|_| Err(SendError::NotConnected(self.core.id().to_string())))
    }

    /// Goes straight to the writer when the write lock is free and nothing is
    /// parked; otherwise parks behind the earlier sends.
    fn send_packet_async(&self, packet: Packet) -> IoFuture {
        let connector_id = self.core.id();
        let future = IoFuture::new(connector_id);
        let mut parked = self.outlet.parked.lock();

        if parked.packets.is_empty() {
            if let Ok(_write) = self.core.write_lock().try_lock() {
                self.outlet.push(connector_id, packet, Completion::Future(future.clone()));
                return future;
            }
        }

        if !parked.draining {
            let Ok(runtime) = Handle::try_current() else {
                future.set_failure(SendError::Undeliverable {
                    connector_id: connector_id.to_string(),
                    reason: "no async runtime to queue the send".to_string(),
                });
                return future;
            };
            parked.draining = true;
            runtime.spawn(
                self.outlet
                    .clone()
                    .drain(self.core.write_lock().clone(), connector_id.to_string()),
            );
        }
        parked.packets.push_back((packet, future.clone()));
        future
    }

    async fn close(&self, reason: CloseReason) {
        let _ = self.outlet.sender.send(Outbound::Close(reason));
    }
}
