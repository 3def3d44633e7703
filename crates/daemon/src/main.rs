//! btrfsd
//!
//! The control endpoint of the btrfs filesystem driver: client tools connect,
//! send a single text command, and receive a single text reply.

mod cli;
mod client;
mod config;
mod connection;
mod dispatch;
mod server;
mod state;
#[cfg(test)]
mod testing;
mod transport;

use btrfsd_protocol::{LIST_COMMAND, Request, Status, parse_list_reply};
use clap::Parser;
use cli::{Cli, Command};
use client::send_request;
use color_eyre::eyre::{Result, bail};
use config::Config;
use dispatch::Dispatcher;
use server::Server;
use state::VolumeTable;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use transport::PlatformEndpoint;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref())?
        .with_endpoint(cli.endpoint.clone())
        .with_log_level(cli.log_level.clone());

    // Only the service itself logs at the configured level
    match &cli.command {
        Command::Start => init_logging(&config.daemon.log_level)?,
        _ => init_logging("warn")?,
    }

    let endpoint = config.daemon.endpoint.clone();
    match cli.command {
        Command::Start => cmd_start(config).await,
        Command::Status => cmd_status(&endpoint).await,
        Command::List => cmd_list(&endpoint).await,
        Command::Send { lines } => cmd_send(&endpoint, lines).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

async fn cmd_start(config: Config) -> Result<()> {
    let endpoint_path = config.daemon.endpoint.clone();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %endpoint_path.display(),
        "Starting btrfsd"
    );

    let table = Arc::new(VolumeTable::with_entries(config.volume.clone()));
    tracing::debug!(volumes = table.len(), "Volume table loaded");
    let endpoint = PlatformEndpoint::bind(&endpoint_path)?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    // Set up signal handlers
    let termination = termination_signal()?;
    tokio::spawn(async move {
        termination.await;
        let _ = shutdown_tx.send(());
    });

    let server = Server::new(
        endpoint,
        Dispatcher::new(table),
        shutdown_rx,
        config.daemon.accept_backoff(),
    );
    tracing::info!("Service started.");

    // The listener owns its own task for the life of the service
    tokio::spawn(server.run()).await?;

    tracing::info!("Service stopped.");
    Ok(())
}

#[cfg(unix)]
fn termination_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    })
}

#[cfg(not(unix))]
fn termination_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C"),
            Err(e) => {
                // Keep serving; the process can still be killed externally
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    })
}

async fn cmd_status(endpoint: &Path) -> Result<()> {
    match send_request(endpoint, &Request::new(LIST_COMMAND)).await {
        Ok(reply) if reply.status() == Some(Status::Data) => {
            println!("Service is running at {}", endpoint.display());
            println!("Status: OK");
        }
        Ok(reply) => {
            println!("Unexpected reply: {}", reply.to_text());
        }
        Err(e) => {
            println!("Service is not reachable at {}: {}", endpoint.display(), e);
        }
    }

    Ok(())
}

async fn cmd_list(endpoint: &Path) -> Result<()> {
    let reply = send_request(endpoint, &Request::new(LIST_COMMAND)).await?;
    let entries = parse_list_reply(&reply)?;

    if entries.is_empty() {
        println!("No entries");
        return Ok(());
    }

    for entry in entries {
        let data = &entry.mount_data;
        println!("{} on {}", entry.fs_uuid, data.mount_point);
        println!("  options:  {:?}", data.options);
        if !data.subvol_name.is_empty() {
            println!("  subvol:   {}", data.subvol_name);
        }
        if data.subvol_id != 0 {
            println!("  subvolid: {}", data.subvol_id);
        }
        if !data.dump_file.is_empty() {
            println!("  dump:     {}", data.dump_file);
        }
        for device in &data.devices {
            println!("  device:   {}", device);
        }
    }

    Ok(())
}

async fn cmd_send(endpoint: &Path, lines: Vec<String>) -> Result<()> {
    let request = Request::from_lines(lines)?;
    let reply = send_request(endpoint, &request).await?;

    println!("{}", reply.to_text());
    if reply.status() == Some(Status::Error) {
        bail!("The service reported an error");
    }

    Ok(())
}
