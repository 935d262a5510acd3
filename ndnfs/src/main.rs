mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libndnfs::backend::NedgeClient;
use libndnfs::transport::PluginServer;
use libndnfs::{NdnfsConfig, SystemMounter, VolumeDriver};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, LogFormat, VolumeCommand};

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn build_driver(config: &NdnfsConfig) -> Result<Arc<VolumeDriver>> {
    let client =
        NedgeClient::new(&config.client_config()).context("failed to build management client")?;
    let mounter = SystemMounter::new(config.mount_options());
    Ok(Arc::new(VolumeDriver::new(
        Arc::new(client),
        Arc::new(mounter),
        config.driver_config(),
    )))
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler, relying on SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

async fn run_volume(driver: &VolumeDriver, command: VolumeCommand) -> Result<()> {
    match command {
        VolumeCommand::Create { name, opts } => {
            let opts: HashMap<String, String> = opts.into_iter().collect();
            let id = driver
                .create(&name, &opts)
                .await
                .with_context(|| format!("failed to create volume {name}"))?;
            println!("{id}");
        }
        VolumeCommand::Delete { name } => {
            driver
                .remove(&name)
                .await
                .with_context(|| format!("failed to delete volume {name}"))?;
        }
        VolumeCommand::List => {
            let volumes = driver.list().await.context("failed to list volumes")?;
            println!("{}", serde_json::to_string_pretty(&volumes)?);
        }
        VolumeCommand::Get { name } => {
            let volume = driver
                .get(&name)
                .await
                .with_context(|| format!("failed to get volume {name}"))?;
            println!("{}", serde_json::to_string_pretty(&volume)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = NdnfsConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let driver = build_driver(&config)?;

    match cli.command {
        Command::Start(args) => {
            if let Err(e) = driver.probe().await {
                warn!(error = %e, "management API not healthy at startup");
            }
            let server = PluginServer::bind(&args.socket, driver)
                .with_context(|| format!("failed to bind {}", args.socket.display()))?;
            server.serve(shutdown_signal()).await?;
        }
        Command::Volume(command) => run_volume(&driver, command).await?,
        Command::Health => {
            driver
                .probe()
                .await
                .context("management API health check failed")?;
            println!("ok");
        }
    }
    Ok(())
}
