//! Identity, settings and server back-pointer shared by filters and plug-ins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::ComponentConfig;
use crate::error::ConfigError;
use crate::server::Server;

/// Common state of a filter or plug-in.
///
/// The server back-pointer is set when the component is added to a chain and
/// cleared when it is removed, so a component never keeps its server alive.
#[derive(Debug)]
pub struct Descriptor {
    id: String,
    name: String,
    namespace: String,
    servers: Vec<String>,
    version: RwLock<Option<String>>,
    enabled: AtomicBool,
    settings: RwLock<HashMap<String, Value>>,
    server: RwLock<Weak<Server>>,
}

impl Descriptor {
    /// Creates an enabled descriptor with no settings.
    pub fn new(id: impl Into<String>, namespace: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            namespace: namespace.into(),
            servers: Vec::new(),
            version: RwLock::new(None),
            enabled: AtomicBool::new(true),
            settings: RwLock::new(HashMap::new()),
            server: RwLock::new(Weak::new()),
        }
    }

    /// Creates a descriptor from a validated component configuration.
    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            namespace: config.namespace.clone(),
            servers: config.servers.clone(),
            version: RwLock::new(None),
            enabled: AtomicBool::new(config.enabled),
            settings: RwLock::new(config.settings.clone()),
            server: RwLock::new(Weak::new()),
        })
    }

    pub fn with_setting(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.write().insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Server ids this component is assigned to; empty means all servers.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn version(&self) -> Option<String> {
        self.version.read().clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        *self.version.write() = Some(version.into());
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stores the flag and returns the previous value.
    pub(crate) fn swap_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// A string setting. Non-string scalars are rendered as text.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.settings.read().get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    /// An integer setting, accepting numbers and numeric strings.
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.settings.read().get(key)? {
            Value::Number(value) => value.as_i64(),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.settings.read().get(key)? {
            Value::Bool(value) => Some(*value),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    /// A structured setting. Only objects are returned.
    pub fn get_json(&self, key: &str) -> Option<Value> {
        self.settings.read().get(key).filter(|value| value.is_object()).cloned()
    }

    pub fn settings(&self) -> HashMap<String, Value> {
        self.settings.read().clone()
    }

    pub fn add_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.write().insert(key.into(), Value::String(value.into()));
    }

    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.settings.write().insert(key.into(), value.into());
    }

    pub fn remove_setting(&self, key: &str) -> Option<Value> {
        self.settings.write().remove(key)
    }

    pub fn clear_settings(&self) {
        self.settings.write().clear();
    }

    // ========================================================================
    // Server back-pointer
    // ========================================================================

    /// The server this component is attached to, if it is still alive.
    pub fn server(&self) -> Option<Arc<Server>> {
        self.server.read().upgrade()
    }

    pub(crate) fn attach(&self, server: Weak<Server>) {
        *self.server.write() = server;
    }

    pub(crate) fn detach(&self) {
        *self.server.write() = Weak::new();
    }
}
