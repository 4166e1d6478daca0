//! BlackBox Relay
//!
//! Public coordinator between one remote device and any number of observers.
//! Accepts authenticated QUIC connections and routes every frame between them;
//! it never interprets terminal bytes, telemetry fields or job payloads.

mod hub;
mod server;

use anyhow::{Context, Result};
use blackbox_core::AuthGate;
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// BlackBox relay - routes device and observer traffic
#[derive(Parser, Debug)]
#[command(name = "blackbox-relay")]
#[command(author = "BlackBox Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay hub for remote device supervision", long_about = None)]
struct Args {
    /// Bind address for the QUIC listener
    #[arg(short, long, default_value = "0.0.0.0:8443")]
    bind: String,

    /// Pre-shared device token (default: $PI_TOKEN)
    #[arg(long)]
    device_token: Option<String>,

    /// Observer password (default: $BLACKBOX_PASSWORD)
    #[arg(long)]
    password: Option<String>,

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

    info!("Starting BlackBox Relay v{}", env!("CARGO_PKG_VERSION"));

    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", args.bind))?;

    let device_token = args
        .device_token
        .or_else(|| std::env::var("PI_TOKEN").ok())
        .unwrap_or_else(|| "pi-secret-token".to_string());
    let password = args
        .password
        .or_else(|| std::env::var("BLACKBOX_PASSWORD").ok())
        .unwrap_or_else(|| "blackbox".to_string());

    let mut server = server::RelayServer::new(bind_addr, AuthGate::new(device_token, password))
        .await
        .context("Failed to start relay server")?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to setup SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = server_handle => {
            result.context("Server task failed")?;
        }
    }

    info!("Shutdown complete");
    Ok(())
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
