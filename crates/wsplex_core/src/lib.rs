//! # wsplex core
//!
//! Transport-agnostic core of a pluggable WebSocket server.
//!
//! ## Architecture
//!
//! * **Connectors** ([`Connector`]) represent live client connections and carry
//!   per-connection variables used for addressing.
//! * **Engines** ([`Engine`]) own a transport endpoint and the registry of its
//!   connectors, and relay lifecycle events and packets to their servers.
//! * **Servers** ([`Server`]) route each inbound packet through a
//!   [`FilterChain`], then a [`PlugInChain`], then their [`ServerListener`]s,
//!   and offer lookup, selection and broadcast across all their engines.
//!
//! Every call into a filter, plug-in or listener is isolated: an error or a
//! panic is reported to the server's [`DispatchObserver`] and dispatch
//! continues with the next component.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsplex_core::*;
//!
//! # async fn run() -> Result<(), CoreError> {
//! let engine = Engine::builder(EngineConfig::new("mem0", "memory"), Arc::new(MemoryTransport::new()))
//!     .build()?;
//! let server = Server::new(ServerConfig::new("ts0", "token server"))?;
//! server.add_engine(&engine);
//! engine.start_engine().await?;
//!
//! let client = MemoryTransport::connect(&engine, "127.0.0.1:4000".parse().expect("valid address")).await?;
//! client.receive(Packet::text("hello")).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod descriptor;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filter;
pub mod io_future;
pub mod memory;
pub mod packet;
pub mod plugin;
pub mod server;

pub use config::{
    ComponentConfig, DispatchMode, EngineConfig, FilterConfig, InstanceConfig, MaxConnectionsStrategy,
    PluginConfig, ServerConfig, ThreadPoolConfig,
};
pub use connector::{
    Connector, ConnectorCore, ConnectorLifecycle, ConnectorRef, ConnectorStatus, RequestHeader, VarMatcher,
    VariableBag,
};
pub use descriptor::Descriptor;
pub use dispatch::{DispatchFailure, DispatchObserver, Stage, TracingObserver};
pub use engine::{Engine, EngineBuilder, Transport};
pub use error::{ConfigError, CoreError, DispatchError, SendError};
pub use filter::{Filter, FilterChain, FilterRef, FilterResponse};
pub use io_future::{IoFuture, IoFutureListener, IoOutcome, ListenerId};
pub use memory::{MemoryConnector, MemoryTransport};
pub use packet::{CloseReason, FrameType, Packet};
pub use plugin::{PlugIn, PlugInChain, PlugInRef, PlugInResponse};
pub use server::{BroadcastOptions, BroadcastOutcome, Disposition, ListenerRef, Server, ServerEvent, ServerListener};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde_json::{json, Value};
