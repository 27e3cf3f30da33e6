//! Data packets and close reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// WebSocket frame type carried by a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

/// A unit of application data exchanged with a connector.
///
/// The core treats the payload as opaque bytes; the frame type only matters to
/// transports when they put the packet on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    frame_type: FrameType,
    data: Vec<u8>,
}

impl Packet {
    pub fn new(frame_type: FrameType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            data: data.into(),
        }
    }

    /// Creates a text packet.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameType::Text, text.into().into_bytes())
    }

    /// Creates a binary packet.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(FrameType::Binary, data)
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ping, pong and close frames are control frames.
    pub fn is_control(&self) -> bool {
        matches!(
            self.frame_type,
            FrameType::Ping | FrameType::Pong | FrameType::Close
        )
    }
}

/// Why a connector was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    /// No traffic within the session timeout.
    Timeout,
    /// The connection failed or the peer violated the protocol.
    Broken,
    /// The client closed the connection.
    Client,
    /// The server closed the connection.
    Server,
    /// The engine is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Timeout => "timeout",
            CloseReason::Broken => "broken",
            CloseReason::Client => "client",
            CloseReason::Server => "server",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
