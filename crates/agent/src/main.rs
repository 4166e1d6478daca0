//! BlackBox Agent
//!
//! Device-side service: keeps the BLE provisioning channel advertised, waits
//! for a network path, then connects to the relay and serves telemetry,
//! terminal sessions and diagnostic jobs until shut down.

#[cfg(target_os = "linux")]
mod ble;
mod client;
mod hacking;
mod pty;
mod telemetry;
mod terminal;
mod wifi;

use anyhow::{Context, Result};
use blackbox_core::terminal::TerminalConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::client::RelayClient;
use crate::hacking::JobConfig;
use crate::wifi::{NmcliScanner, Provisioner};

/// How often to re-check for a network path while offline
const CONNECTIVITY_POLL: Duration = Duration::from_secs(10);

/// BlackBox agent - device-side supervision service
#[derive(Parser, Debug)]
#[command(name = "blackbox-agent")]
#[command(author = "BlackBox Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Device agent for remote supervision through the relay", long_about = None)]
struct Args {
    /// Relay address
    #[arg(short, long, default_value = "127.0.0.1:8443")]
    relay: String,

    /// TLS server name presented by the relay's certificate
    #[arg(long, default_value = "blackbox-relay")]
    server_name: String,

    /// Device token (default: $PI_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Shell for terminal sessions
    #[arg(long)]
    shell: Option<String>,

    /// Working directory for terminal sessions and diagnostic jobs
    #[arg(long, default_value = "/root")]
    workdir: PathBuf,

    /// Disable the BLE provisioning service
    #[arg(long, default_value = "false")]
    no_ble: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls CryptoProvider with ring backend (required for rustls 0.23+)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    setup_logging(&args.log_level)?;

    info!("Starting BlackBox Agent v{}", env!("CARGO_PKG_VERSION"));

    let relay_addr: SocketAddr = args
        .relay
        .parse()
        .with_context(|| format!("Invalid relay address: {}", args.relay))?;
    let token = args
        .token
        .clone()
        .or_else(|| std::env::var("PI_TOKEN").ok())
        .unwrap_or_else(|| "pi-secret-token".to_string());

    let mut terminal_config = TerminalConfig::default().with_cwd(args.workdir.clone());
    if let Some(shell) = &args.shell {
        terminal_config = terminal_config.with_shell(shell.clone());
    }
    let job_config = JobConfig {
        cwd: args.workdir.clone(),
        ..JobConfig::default()
    };

    // The provisioning channel is always advertised, even once the relay is
    // reachable, so the network can be reconfigured later
    let provisioner = Arc::new(Provisioner::new(Arc::new(NmcliScanner)));
    #[cfg(target_os = "linux")]
    {
        if !args.no_ble {
            let provisioner = Arc::clone(&provisioner);
            tokio::spawn(async move {
                if let Err(e) = ble::run(provisioner).await {
                    warn!("BLE provisioning unavailable: {}", e);
                }
            });
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = &provisioner;

    let client = RelayClient::new(
        relay_addr,
        args.server_name.clone(),
        token,
        terminal_config,
        job_config,
    )?;

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to setup SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = serve_forever(client) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for a network path, then run relay sessions until the process exits
async fn serve_forever(client: RelayClient) {
    loop {
        if telemetry::local_ip().is_none() {
            info!("No network path, waiting for provisioning...");
            tokio::time::sleep(CONNECTIVITY_POLL).await;
            continue;
        }

        if let Err(e) = client.run_session().await {
            warn!("Session ended with error: {}", e);
        }
        // The relay may be restarting; back off briefly before redialing
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
