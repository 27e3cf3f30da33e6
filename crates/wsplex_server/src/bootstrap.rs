//! Builds and runs an instance from a [`Config`].
//!
//! Every engine is linked to every server. Filters and plug-ins are created
//! once per assigned server, in configuration order, from the
//! [`ComponentRegistry`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use wsplex_core::{
    CloseReason, ConfigError, CoreError, Descriptor, Engine, EngineConfig, Server, Transport,
};

use crate::builtin::ComponentRegistry;
use crate::config::Config;
use crate::transport::TcpTransport;

/// Errors raised while assembling an instance.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Unknown filter '{name}' for component '{id}'")]
    UnknownFilter { id: String, name: String },
    #[error("Unknown plug-in '{name}' for component '{id}'")]
    UnknownPlugIn { id: String, name: String },
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// The engines and servers of one running process.
#[derive(Debug)]
pub struct Instance {
    engines: Vec<Arc<Engine>>,
    servers: Vec<Arc<Server>>,
}

impl Instance {
    /// Builds an instance whose engines listen on TCP.
    pub fn build(config: &Config, registry: &ComponentRegistry) -> Result<Self, BootstrapError> {
        Self::build_with(config, registry, |_| Arc::new(TcpTransport::new()))
    }

    /// Builds an instance with a custom transport per engine.
    pub fn build_with<F>(config: &Config, registry: &ComponentRegistry, transport: F) -> Result<Self, BootstrapError>
    where
        F: Fn(&EngineConfig) -> Arc<dyn Transport>,
    {
        config.validate()?;

        let engines = config
            .engines
            .iter()
            .map(|engine_config| {
                Engine::builder(engine_config.clone(), transport(engine_config))
                    .instance(&config.instance)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let servers = config
            .servers
            .iter()
            .map(|server_config| Server::new(server_config.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        for server in &servers {
            for engine in &engines {
                server.add_engine(engine);
            }

            let assigned = |servers: &[String]| servers.is_empty() || servers.iter().any(|id| id == server.id());

            for filter_config in config.filters.iter().filter(|c| assigned(&c.servers)) {
                let descriptor = Descriptor::from_config(filter_config)?;
                let filter = registry
                    .create_filter(&filter_config.name, descriptor)
                    .ok_or_else(|| BootstrapError::UnknownFilter {
                        id: filter_config.id.clone(),
                        name: filter_config.name.clone(),
                    })?;
                server.filter_chain().add_filter(filter);
            }

            for plugin_config in config.plugins.iter().filter(|c| assigned(&c.servers)) {
                let descriptor = Descriptor::from_config(plugin_config)?;
                let plugin = registry
                    .create_plugin(&plugin_config.name, descriptor)
                    .ok_or_else(|| BootstrapError::UnknownPlugIn {
                        id: plugin_config.id.clone(),
                        name: plugin_config.name.clone(),
                    })?;
                server.plugin_chain().add_plugin(plugin);
            }

            info!(
                "📦 Server '{}': {} filter(s), {} plug-in(s), {} engine(s)",
                server.id(),
                server.filter_chain().len(),
                server.plugin_chain().len(),
                engines.len()
            );
        }

        Ok(Self { engines, servers })
    }

    pub fn engines(&self) -> &[Arc<Engine>] {
        &self.engines
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn engine(&self, id: &str) -> Option<&Arc<Engine>> {
        self.engines.iter().find(|engine| engine.id() == id)
    }

    pub fn server(&self, id: &str) -> Option<&Arc<Server>> {
        self.servers.iter().find(|server| server.id() == id)
    }

    /// Starts servers, then engines.
    ///
    /// If an engine fails to start, the engines already started are stopped
    /// again and the error is returned.
    pub async fn start(&self) -> Result<(), CoreError> {
        for server in &self.servers {
            server.start_server();
        }
        for (index, engine) in self.engines.iter().enumerate() {
            if let Err(e) = engine.start_engine().await {
                error!("Failed to start engine '{}': {}", engine.id(), e);
                for started in &self.engines[..index] {
                    let _ = started.stop_engine(CloseReason::Shutdown).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops engines, then servers.
    pub async fn stop(&self, reason: CloseReason) {
        for engine in &self.engines {
            if let Err(e) = engine.stop_engine(reason).await {
                error!("Failed to stop engine '{}': {}", engine.id(), e);
            }
        }
        for server in &self.servers {
            server.stop_server();
        }
    }
}
