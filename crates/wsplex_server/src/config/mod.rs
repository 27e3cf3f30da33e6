//! Configuration module for the wsplex server
//!
//! This module handles command-line arguments, configuration file parsing,
//! and provides default settings for the server.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::{Config, LoggingSettings};

use anyhow::Result;
use tracing::{info, warn};

/// Load configuration from file or create default configuration
///
/// If the file doesn't exist, a default configuration file is written and
/// returned. Command-line overrides are applied afterwards and the result is
/// validated.
///
/// # Arguments
/// * `args` - Command line arguments containing the config file path
///
/// # Returns
/// * `Result<Config>` - The loaded or default configuration
///
/// # Errors
/// * Returns error if file I/O operations fail
/// * Returns error if TOML parsing or validation fails
pub async fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        match toml::de::from_str::<Config>(&config_str) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to parse config file {}: {}", args.config.display(), e);
                return Err(e.into());
            }
        }
    } else {
        warn!("Configuration file not found: {}, using defaults", args.config.display());

        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(&args.config, config_str).await?;
        info!("Created default configuration file: {}", args.config.display());

        default_config
    };

    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

/// Applies command-line overrides to a loaded configuration.
pub fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(port) = args.port {
        match config.engines.first_mut() {
            Some(engine) => engine.port = Some(port),
            None => warn!("--port given but no engine is configured"),
        }
    }
    if let Some(node_id) = &args.node_id {
        config.instance.node_id = Some(node_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[tokio::test]
    async fn test_load_config_creates_default() {
        let dir = tempdir().expect("Failed to create temp dir");
        let args = Args {
            config: dir.path().join("wsplex.toml"),
            ..Args::default()
        };

        let config = load_config(&args).await.expect("Failed to load config");
        assert_eq!(config, Config::default());
        assert!(args.config.exists());
    }

    #[tokio::test]
    async fn test_load_config_with_overrides() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"
[[engines]]
id = "tcp0"
name = "tcp"
port = 8000

[[servers]]
id = "ts0"
name = "token server"
"#
        )
        .expect("Failed to write config");

        let args = Args {
            config: file.path().to_path_buf(),
            port: Some(9100),
            node_id: Some("n7".to_string()),
            ..Args::default()
        };
        let config = load_config(&args).await.expect("Failed to load config");
        assert_eq!(config.engines[0].port, Some(9100));
        assert_eq!(config.instance.node_id(), Some("n7"));
        assert!(config.plugins.is_empty());
    }

    #[tokio::test]
    async fn test_load_config_rejects_invalid() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"
[[engines]]
id = "tcp0"
name = "tcp"
max_connections = 0
"#
        )
        .expect("Failed to write config");

        let args = Args {
            config: file.path().to_path_buf(),
            ..Args::default()
        };
        assert!(load_config(&args).await.is_err());
    }
}
