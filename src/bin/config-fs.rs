//! config-fs Binary
//!
//! Mirrors the configured key/value store into the mount point until interrupted.

use anyhow::Context;
use clap::Parser;
use config_fs::cli::Cli;
use config_fs::config::ConfigLoader;
use config_fs::logging::init_logging;
use config_fs::sync::ConfigurationStore;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => cli.apply(config),
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if cli.dump_config {
        match config.to_toml() {
            Ok(rendered) => {
                print!("{}", rendered);
                return;
            }
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("config-fs starting");
    if let Err(e) = run(config).await {
        error!(error = %e, "config-fs failed");
        eprintln!("{:#}", e);
        process::exit(1);
    }
}

async fn run(config: config_fs::config::SyncConfig) -> anyhow::Result<()> {
    let store = ConfigurationStore::new(config)
        .await
        .context("Failed to create the configuration store")?;
    let handle = store
        .synchronize()
        .await
        .context("Failed to start synchronization")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the interrupt signal")?;
    info!("Interrupt received, shutting down");
    store.close();

    handle.wait().await.context("Synchronization did not stop cleanly")?;
    let stats = store.stats();
    info!(
        node_events = stats.node_events,
        template_events = stats.template_events,
        resyncs = stats.resyncs,
        handler_failures = stats.handler_failures,
        "config-fs stopped"
    );
    Ok(())
}
