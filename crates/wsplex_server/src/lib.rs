//! # wsplex server
//!
//! Runtime for the wsplex WebSocket framework: configuration loading,
//! logging, the TCP transport, the built-in filters and plug-ins, and the
//! bootstrap that wires engines, servers and components together.

pub mod bootstrap;
pub mod builtin;
pub mod config;
pub mod logging;
pub mod shutdown;
pub mod transport;

pub use bootstrap::{BootstrapError, Instance};
pub use builtin::ComponentRegistry;
pub use config::{load_config, Args, Config};
pub use logging::setup_logging;
pub use shutdown::setup_shutdown_handler;
pub use transport::{TcpConnector, TcpTransport};
