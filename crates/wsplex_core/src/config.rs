//! Configuration records for engines, servers, filters and plug-ins.
//!
//! Every record is plain serde data so it can be embedded in a TOML file, and
//! every record has a `validate()` method. Engines and servers refuse to be
//! constructed from a configuration that fails validation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

// ============================================================================
// Defaults
// ============================================================================

/// Default plain WebSocket port.
pub const DEFAULT_PORT: u16 = 8787;
/// Default connection limit per engine.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10_000;
/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;
/// Default session timeout in milliseconds; `0` disables the idle timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 0;
/// Default thread pool sizing for servers.
pub const DEFAULT_CORE_POOL_SIZE: u32 = 10;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_BLOCKING_QUEUE_SIZE: u32 = 1000;

fn require(kind: &'static str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { kind, field });
    }
    Ok(())
}

fn invalid(kind: &'static str, id: &str, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        kind,
        id: id.to_string(),
        field,
        reason: reason.into(),
    }
}

// ============================================================================
// Engine
// ============================================================================

/// What an engine does with a new connection once it is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxConnectionsStrategy {
    /// Hold the connection until a slot frees up.
    Wait,
    /// Complete the handshake, then close with a policy violation.
    Close,
    /// Refuse the handshake.
    #[default]
    Reject,
    /// Answer the handshake with a redirect to another endpoint.
    Redirect,
}

impl MaxConnectionsStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Close => "close",
            Self::Reject => "reject",
            Self::Redirect => "redirect",
        }
    }
}

impl fmt::Display for MaxConnectionsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaxConnectionsStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "close" => Ok(Self::Close),
            "reject" => Ok(Self::Reject),
            "redirect" => Ok(Self::Redirect),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Engine configuration.
///
/// `port` and `ssl_port` are optional; a transport that needs a port reports an
/// error at start time if none is configured. A `port` of `0` asks the OS for an
/// ephemeral port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub id: String,
    pub name: String,
    pub jar: Option<String>,
    pub context: Option<String>,
    pub servlet: Option<String>,
    pub port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub keystore: Option<String>,
    pub keystore_password: Option<String>,
    /// Session timeout in milliseconds; `0` disables it.
    pub timeout_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Allowed handshake origins. `*` wildcards are accepted.
    pub domains: Vec<String>,
    pub max_connections: u32,
    pub on_max_connections: MaxConnectionsStrategy,
    /// Target of the redirect strategy.
    pub redirect_url: Option<String>,
    pub settings: HashMap<String, Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            jar: None,
            context: None,
            servlet: None,
            port: Some(DEFAULT_PORT),
            ssl_port: None,
            keystore: None,
            keystore_password: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            domains: vec!["*".to_string()],
            max_connections: DEFAULT_MAX_CONNECTIONS,
            on_max_connections: MaxConnectionsStrategy::Reject,
            redirect_url: None,
            settings: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with the given id and name and default limits.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_max_connections(mut self, max: u32, strategy: MaxConnectionsStrategy) -> Self {
        self.max_connections = max;
        self.on_max_connections = strategy;
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// The configured max-connections strategy.
    pub fn on_max_connections_strategy(&self) -> MaxConnectionsStrategy {
        self.on_max_connections
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// * `MissingField` if `id` or `name` is blank
    /// * `InvalidValue` for an empty domain list, an SSL port without keystore
    ///   credentials, a zero connection limit or a zero frame size
    pub fn validate(&self) -> Result<(), ConfigError> {
        const KIND: &str = "engine";
        require(KIND, "id", &self.id)?;
        require(KIND, "name", &self.name)?;

        if self.domains.is_empty() || self.domains.iter().any(|d| d.trim().is_empty()) {
            return Err(invalid(KIND, &self.id, "domains", "at least one non-empty domain is required"));
        }

        if self.ssl_port.is_some() {
            let keystore = self.keystore.as_deref().unwrap_or_default();
            let password = self.keystore_password.as_deref().unwrap_or_default();
            if keystore.trim().is_empty() || password.trim().is_empty() {
                return Err(invalid(
                    KIND,
                    &self.id,
                    "ssl_port",
                    "an SSL port requires a keystore and a keystore password",
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(invalid(KIND, &self.id, "max_connections", "must be greater than zero"));
        }
        if self.max_frame_size == 0 {
            return Err(invalid(KIND, &self.id, "max_frame_size", "must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

/// Sizing for a server's worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub core_pool_size: u32,
    pub max_pool_size: u32,
    pub keep_alive_secs: u64,
    pub blocking_queue_size: u32,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: DEFAULT_CORE_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            blocking_queue_size: DEFAULT_BLOCKING_QUEUE_SIZE,
        }
    }
}

impl ThreadPoolConfig {
    pub fn validate(&self, server_id: &str) -> Result<(), ConfigError> {
        const KIND: &str = "server";
        if self.core_pool_size == 0 {
            return Err(invalid(KIND, server_id, "core_pool_size", "must be greater than zero"));
        }
        if self.max_pool_size == 0 {
            return Err(invalid(KIND, server_id, "max_pool_size", "must be greater than zero"));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(invalid(KIND, server_id, "core_pool_size", "must not exceed max_pool_size"));
        }
        if self.keep_alive_secs == 0 {
            return Err(invalid(KIND, server_id, "keep_alive_secs", "must be greater than zero"));
        }
        if self.blocking_queue_size == 0 {
            return Err(invalid(KIND, server_id, "blocking_queue_size", "must be greater than zero"));
        }
        Ok(())
    }
}

/// How a server routes inbound packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Filter chain, then plug-in chain, then listeners.
    #[default]
    Chained,
    /// Listeners only; both chains are bypassed.
    Listeners,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    pub jar: Option<String>,
    pub dispatch: DispatchMode,
    pub thread_pool: ThreadPoolConfig,
    pub settings: HashMap<String, Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            jar: None,
            dispatch: DispatchMode::Chained,
            thread_pool: ThreadPoolConfig::default(),
            settings: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("server", "id", &self.id)?;
        require("server", "name", &self.name)?;
        self.thread_pool.validate(&self.id)
    }
}

// ============================================================================
// Filters and plug-ins
// ============================================================================

/// Configuration shared by filters and plug-ins.
///
/// `name` selects the implementation from the component registry. An empty
/// `servers` list assigns the component to every server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    pub id: String,
    pub name: String,
    pub package: Option<String>,
    pub jar: Option<String>,
    pub namespace: String,
    pub servers: Vec<String>,
    pub enabled: bool,
    pub settings: HashMap<String, Value>,
}

/// Filter configuration.
pub type FilterConfig = ComponentConfig;
/// Plug-in configuration.
pub type PluginConfig = ComponentConfig;

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            package: None,
            jar: None,
            namespace: String::new(),
            servers: Vec::new(),
            enabled: true,
            settings: HashMap::new(),
        }
    }
}

impl ComponentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("component", "id", &self.id)?;
        require("component", "name", &self.name)?;
        require("component", "namespace", &self.namespace)?;
        if self.servers.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("component", &self.id, "servers", "server ids must not be blank"));
        }
        Ok(())
    }
}

// ============================================================================
// Instance
// ============================================================================

/// Settings for the running process as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Cluster node id; prefixes every connector id when set.
    pub node_id: Option<String>,
}

impl InstanceConfig {
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}
