//! Network transports for engines.

pub mod handshake;
pub mod tcp;

pub use tcp::{TcpConnector, TcpTransport};
