//! Configuration file structures
//!
//! The file lists the engines, servers, filters and plug-ins of one instance.
//! Every engine is linked to every server; filters and plug-ins are assigned
//! to the servers named in their `servers` list, or to all servers when the
//! list is empty.

use serde::{Deserialize, Serialize};
use serde_json::json;
use wsplex_core::{
    ComponentConfig, ConfigError, EngineConfig, FilterConfig, InstanceConfig, PluginConfig, ServerConfig,
};

/// Main configuration structure
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub instance: InstanceConfig,
    /// Optional logging configuration
    #[serde(default)]
    pub logging: Option<LoggingSettings>,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Logging system configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Logging level filter
    ///
    /// Valid values: "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Enable JSON-formatted log output
    pub json_format: bool,
}

impl Config {
    /// Validates every record and the references between them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for engine in &self.engines {
            engine.validate()?;
        }
        for server in &self.servers {
            server.validate()?;
        }
        for component in self.filters.iter().chain(&self.plugins) {
            component.validate()?;
            if let Some(unknown) = component
                .servers
                .iter()
                .find(|id| !self.servers.iter().any(|server| &server.id == *id))
            {
                return Err(ConfigError::InvalidValue {
                    kind: "component",
                    id: component.id.clone(),
                    field: "servers",
                    reason: format!("unknown server '{unknown}'"),
                });
            }
        }
        Ok(())
    }
}

impl Default for Config {
    /// A single TCP engine on the default port, one server, the echo plug-in
    /// and a packet size filter.
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            }),
            engines: vec![EngineConfig::new("tcp0", "tcp")],
            servers: vec![ServerConfig::new("ts0", "token server")],
            filters: vec![
                ComponentConfig::new("packet_size", "packet_size", "org.wsplex.filters.size")
                    .with_setting("max_size", json!(65_536)),
            ],
            plugins: vec![ComponentConfig::new("echo", "echo", "org.wsplex.plugins.echo")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsplex_core::{DispatchMode, MaxConnectionsStrategy};

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.engines.len(), 1);
        assert_eq!(config.engines[0].port, Some(wsplex_core::config::DEFAULT_PORT));
        assert_eq!(config.servers[0].id, "ts0");
        assert_eq!(config.plugins[0].name, "echo");
        assert!(config.logging.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("Failed to serialize config");
        let deserialized: Config = toml::from_str(&toml_str).expect("Failed to parse config");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
[instance]
node_id = "n1"

[[engines]]
id = "tcp0"
name = "tcp"
port = 9000
max_connections = 2
on_max_connections = "redirect"
redirect_url = "ws://backup:9000/"
domains = ["http://*.example.com"]

[[servers]]
id = "ts0"
name = "token server"
dispatch = "listeners"

[servers.thread_pool]
core_pool_size = 4
max_pool_size = 8

[[plugins]]
id = "relay"
name = "relay"
namespace = "org.wsplex.plugins.relay"
servers = ["ts0"]

[plugins.settings]
include_sender = true
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse config");
        assert_eq!(config.instance.node_id(), Some("n1"));
        assert_eq!(config.engines[0].max_connections, 2);
        assert_eq!(config.engines[0].on_max_connections, MaxConnectionsStrategy::Redirect);
        assert_eq!(config.servers[0].dispatch, DispatchMode::Listeners);
        assert_eq!(config.servers[0].thread_pool.core_pool_size, 4);
        assert_eq!(config.servers[0].thread_pool.keep_alive_secs, 60);
        assert_eq!(config.plugins[0].settings.get("include_sender"), Some(&json!(true)));
        assert!(config.plugins[0].enabled);
        assert!(config.logging.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_server_reference() {
        let mut config = Config::default();
        config.plugins[0].servers = vec!["missing".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "servers", .. })
        ));
    }
}
