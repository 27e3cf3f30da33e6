//! Command-line argument parsing
//!
//! This module defines the command-line interface for the wsplex server
//! using the clap crate for argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the wsplex server
///
/// These arguments override values from the configuration file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "wsplex.toml")]
    pub config: PathBuf,

    /// Port for the first engine
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Cluster node id, prefixed to every connector id
    #[arg(short, long)]
    pub node_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("wsplex.toml"),
            port: None,
            node_id: None,
            debug: false,
            json_logs: false,
        }
    }
}
