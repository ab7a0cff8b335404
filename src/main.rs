//! # wsdrain
//!
//! Binary entry point: `serve` runs the push server, `connect` runs the
//! reconnecting client. SIGINT / SIGTERM stop either one gracefully.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use wsdrain_client::ReconnectLoop;
use wsdrain_core::{ClientSettings, ClockPayloadSource, ServerSettings};
use wsdrain_telemetry::{init_telemetry, TelemetryConfig};

/// WebSocket push server with a graceful drain protocol, and its client.
#[derive(Parser, Debug)]
#[command(name = "wsdrain", about = "WebSocket push server and reconnecting client")]
struct Cli {
    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until SIGINT / SIGTERM, then drain every session.
    Serve {
        /// Host to bind (overrides `HOST`).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides `PORT`).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a server and keep reconnecting until SIGINT / SIGTERM.
    Connect {
        /// Server WebSocket URL (overrides `SERVER_URL`).
        #[arg(long)]
        url: Option<String>,
    },
}

impl Cli {
    fn server_settings(host: Option<String>, port: Option<u16>) -> ServerSettings {
        let mut settings = ServerSettings::from_env();
        if let Some(host) = host {
            settings.host = host;
        }
        if let Some(port) = port {
            settings.port = port;
        }
        settings
    }

    fn client_settings(url: Option<String>) -> ClientSettings {
        let mut settings = ClientSettings::from_env();
        if let Some(url) = url {
            settings.server_url = url;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.json |= cli.json_logs;
    init_telemetry(&telemetry).context("Failed to initialize logging")?;

    match cli.command {
        Command::Serve { host, port } => serve(Cli::server_settings(host, port)).await,
        Command::Connect { url } => connect(Cli::client_settings(url)).await,
    }
}

async fn serve(settings: ServerSettings) -> Result<()> {
    let handle = wsdrain_server::start(settings, Arc::new(ClockPayloadSource))
        .await
        .context("Failed to start server")?;
    tracing::info!("wsdrain listening on {}", handle.ws_url());

    termination_signal()
        .await
        .context("Failed to listen for termination signal")?;

    tracing::info!("Shutting down...");
    let report = handle.shutdown().await;
    tracing::info!(
        trailing = report.trailing,
        completed = report.completed.len(),
        torn_down = report.torn_down.len(),
        "Shutdown complete"
    );
    Ok(())
}

async fn connect(settings: ClientSettings) -> Result<()> {
    let client = ReconnectLoop::new(settings).context("Invalid client settings")?;
    let cancel = CancellationToken::new();
    let task = tokio::spawn(client.run(cancel.clone()));

    termination_signal()
        .await
        .context("Failed to listen for termination signal")?;

    tracing::info!("Stopping client...");
    cancel.cancel();
    task.await.context("Client task failed")?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
