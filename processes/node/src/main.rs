//! 'main' for the Spindrift node process

use anyhow::Result;
use config::{Config, Environment, File};
use spindrift_bus::{Clock, Process};
use spindrift_common::messages::Message;
use std::sync::Arc;
use tracing::info;

// External modules
use spindrift_module_chain_status::ChainStatus;
use spindrift_module_utx_tracker::UtxTracker;

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Spindrift node process");

    // Read the config
    let config = Arc::new(
        Config::builder()
            .add_source(File::with_name("node").required(false))
            .add_source(Environment::with_prefix("SPINDRIFT"))
            .build()?,
    );

    // Create the process
    let mut process = Process::<Message>::create(config);

    // Register modules
    process.register(ChainStatus::new());
    process.register(UtxTracker::new());
    process.register(Clock::<Message>::new());

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
