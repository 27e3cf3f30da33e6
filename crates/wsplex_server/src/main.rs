//! wsplex server binary.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use wsplex_core::CloseReason;
use wsplex_server::{load_config, setup_logging, setup_shutdown_handler, Args, ComponentRegistry, Instance};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args).await?;
    setup_logging(&args, config.logging.as_ref())?;

    info!("🚀 Starting wsplex v{}", env!("CARGO_PKG_VERSION"));
    let instance = Instance::build(&config, &ComponentRegistry::with_builtins())?;
    instance.start().await?;
    info!(
        "✅ {} engine(s) and {} server(s) running",
        instance.engines().len(),
        instance.servers().len()
    );

    let _ = setup_shutdown_handler().await;
    instance.stop(CloseReason::Shutdown).await;
    info!("👋 wsplex stopped");
    Ok(())
}
