//! QUIC server fronting the relay hub
//!
//! Every connection opens one bidirectional stream and must send a `hello`
//! frame first. A bad credential closes the connection with no response frame.
//! After the handshake the connection is pure store-and-forward: device events
//! go to the hub for broadcast, observer commands go to the hub for
//! forwarding; the hub's outbound queue is drained by a writer task per
//! connection.

use anyhow::{Context, Result};
use blackbox_core::transport::{configure_server, send_message, MessageReader};
use blackbox_core::types::{ControlMessage, RelayMessage};
use blackbox_core::{AuthGate, Role};
use quinn::{Connection, Endpoint, TokioRuntime};
use rcgen::KeyPair;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::hub::Hub;

/// How long a connection may sit unauthenticated before being dropped
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// QUIC server accepting device and observer connections
pub struct RelayServer {
    endpoint: Endpoint,
    hub: Arc<Hub>,
    auth: Arc<AuthGate>,
}

impl RelayServer {
    /// Create a server with a fresh self-signed certificate
    pub async fn new(bind_addr: SocketAddr, auth: AuthGate) -> Result<Self> {
        let (cert, key_pair) = generate_cert_with_keypair()?;
        let key = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());

        let cfg = configure_server(vec![cert], key).context("Failed to configure server")?;

        let socket = std::net::UdpSocket::bind(bind_addr).context("Failed to bind UDP socket")?;
        let runtime = Arc::new(TokioRuntime);
        let endpoint = Endpoint::new(Default::default(), Some(cfg), socket, runtime)
            .context("Failed to create QUIC endpoint")?;

        tracing::info!("Relay listening on {}", bind_addr);

        Ok(Self {
            endpoint,
            hub: Arc::new(Hub::new()),
            auth: Arc::new(auth),
        })
    }

    /// Accept connections until the endpoint closes
    pub async fn run(&mut self) -> Result<()> {
        while let Some(incoming) = self.endpoint.accept().await {
            let hub = Arc::clone(&self.hub);
            let auth = Arc::clone(&self.auth);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(incoming, hub, auth).await {
                    tracing::debug!("Connection ended: {}", e);
                }
            });
        }
        tracing::warn!("Endpoint closed");
        Ok(())
    }

    async fn handle_connection(
        incoming: quinn::Incoming,
        hub: Arc<Hub>,
        auth: Arc<AuthGate>,
    ) -> Result<()> {
        let connection = incoming.accept()?.await?;
        let remote_addr = connection.remote_address();
        tracing::debug!("Connection from {}", remote_addr);

        let (send, recv) = connection.accept_bi().await?;
        let mut reader = MessageReader::new(recv);

        // First frame must be hello; anything else (or silence) drops the link
        let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_message())
            .await
            .context("Handshake timed out")??;

        let RelayMessage::Control(ControlMessage::Hello { role, token }) = hello else {
            connection.close(0u32.into(), b"expected hello");
            anyhow::bail!("First frame from {} was not hello", remote_addr);
        };

        if !auth.authenticate(role, &token) {
            // Deny closes immediately with no further protocol exchange
            tracing::warn!("Auth failed for {:?} from {}", role, remote_addr);
            connection.close(0u32.into(), b"");
            return Ok(());
        }
        tracing::info!("{:?} authenticated from {}", role, remote_addr);

        match role {
            Role::Device => Self::run_device(connection, send, reader, hub).await,
            Role::Observer => Self::run_observer(connection, send, reader, hub).await,
        }
    }

    /// Session loop for the device connection
    async fn run_device(
        connection: Connection,
        send: quinn::SendStream,
        mut reader: MessageReader,
        hub: Arc<Hub>,
    ) -> Result<()> {
        let (tx, rx) = Hub::outbound_queue();
        let (id, replaced) = hub.register_device(tx).await;
        // Dropping the replaced occupant's sender closes its outbound queue;
        // its writer task then shuts that connection down.
        drop(replaced);

        let writer = spawn_writer(connection.clone(), send, rx, "superseded");

        loop {
            match reader.read_message().await {
                Ok(RelayMessage::Event(event)) => hub.broadcast_event(event).await,
                Ok(other) => {
                    tracing::debug!("Ignoring non-event frame from device: {:?}", other)
                }
                Err(e) => {
                    tracing::debug!("Device read ended: {}", e);
                    break;
                }
            }
        }

        hub.unregister_device(id).await;
        writer.abort();
        Ok(())
    }

    /// Session loop for one observer connection
    async fn run_observer(
        connection: Connection,
        send: quinn::SendStream,
        mut reader: MessageReader,
        hub: Arc<Hub>,
    ) -> Result<()> {
        let (tx, rx) = Hub::outbound_queue();
        let id = hub.register_observer(tx).await;

        let writer = spawn_writer(connection.clone(), send, rx, "closed");

        loop {
            match reader.read_message().await {
                Ok(RelayMessage::Command(cmd)) => hub.forward_to_device(cmd).await,
                Ok(other) => {
                    tracing::debug!("Ignoring non-command frame from observer {}: {:?}", id, other)
                }
                Err(e) => {
                    tracing::debug!("Observer {} read ended: {}", id, e);
                    break;
                }
            }
        }

        hub.unregister_observer(id).await;
        writer.abort();
        Ok(())
    }

    /// Shut the listener down
    #[allow(dead_code)]
    pub fn shutdown(&self) {
        self.endpoint.close(0u32.into(), b"Server shutdown");
    }
}

/// Drain a connection's outbound queue onto its QUIC stream
///
/// The queue closing means the hub dropped this connection's sender (device
/// replacement); the connection is closed with the given reason.
fn spawn_writer(
    connection: Connection,
    mut send: quinn::SendStream,
    mut rx: mpsc::Receiver<RelayMessage>,
    close_reason: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_message(&mut send, &msg).await {
                tracing::debug!("Write failed, closing connection: {}", e);
                return;
            }
        }
        connection.close(0u32.into(), close_reason.as_bytes());
    })
}

/// Generate a self-signed TLS certificate with keypair
fn generate_cert_with_keypair() -> Result<(CertificateDer<'static>, KeyPair)> {
    let cert = rcgen::generate_simple_self_signed(vec!["blackbox-relay".to_string()])
        .context("Failed to generate certificate")?;

    Ok((CertificateDer::from(cert.cert.der().to_vec()), cert.key_pair))
}
