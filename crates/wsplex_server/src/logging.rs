//! Logging system setup and configuration
//!
//! This module initializes the tracing-based logging used by the core and the
//! server runtime.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Args, LoggingSettings};

/// Initialize the logging system
///
/// The level comes from `RUST_LOG` if set, then `--debug`, then the config
/// file, then `info`. JSON output is used when either `--json-logs` or the
/// config file asks for it.
///
/// # Arguments
/// * `args` - Command line arguments containing debug and JSON flags
/// * `settings` - Optional logging section of the configuration file
///
/// # Returns
/// * `Result<()>` - Success or error during logging setup
pub fn setup_logging(args: &Args, settings: Option<&LoggingSettings>) -> Result<()> {
    let level = if args.debug {
        "debug"
    } else {
        settings.map_or("info", |s| s.level.as_str())
    };
    let json = args.json_logs || settings.is_some_and(|s| s.json_format);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}
