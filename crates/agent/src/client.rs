//! Relay connection and device session loop
//!
//! The agent dials the relay, authenticates as the device, then runs one
//! session: a telemetry ticker and the terminal/job managers feed a single
//! event channel whose writer task owns the send stream, while the read loop
//! dispatches observer commands. When the link drops the session tears down
//! (terminal killed, job cancelled) and the caller reconnects.

use anyhow::{Context, Result};
use blackbox_core::terminal::TerminalConfig;
use blackbox_core::transport::{
    configure_client, reconnect_with_backoff, send_message, MessageReader, ReconnectConfig,
};
use blackbox_core::types::{decode_terminal_bytes, ControlMessage, ObserverCommand, RelayMessage};
use blackbox_core::{DeviceEvent, Role};
use quinn::Endpoint;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig as RustlsClientConfig, DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hacking::{JobConfig, JobSupervisor};
use crate::pty::PtySpawner;
use crate::telemetry::Sampler;
use crate::terminal::TerminalManager;

/// Accept the relay's self-signed certificate
///
/// The deployment pairs one agent with one relay over a pre-shared token;
/// transport privacy comes from TLS, endpoint identity from the token.
#[derive(Debug)]
struct SkipVerification;

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Device-side relay client
pub struct RelayClient {
    endpoint: Endpoint,
    relay_addr: SocketAddr,
    server_name: String,
    token: String,
    terminal_config: TerminalConfig,
    job_config: JobConfig,
}

impl RelayClient {
    pub fn new(
        relay_addr: SocketAddr,
        server_name: String,
        token: String,
        terminal_config: TerminalConfig,
        job_config: JobConfig,
    ) -> Result<Self> {
        let mut endpoint =
            Endpoint::client("0.0.0.0:0".parse()?).context("Failed to create client endpoint")?;

        let crypto = RustlsClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification))
            .with_no_client_auth();
        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .context("Failed to build QUIC crypto config")?;
        endpoint.set_default_client_config(
            configure_client(Arc::new(quic_crypto)).context("Failed to configure transport")?,
        );

        Ok(Self {
            endpoint,
            relay_addr,
            server_name,
            token,
            terminal_config,
            job_config,
        })
    }

    /// Connect (retrying with backoff) and run one session until the link drops
    pub async fn run_session(&self) -> Result<()> {
        let connection = reconnect_with_backoff(
            &self.endpoint,
            self.relay_addr,
            &self.server_name,
            &ReconnectConfig::default(),
        )
        .await
        .context("Failed to reach relay")?;

        let (mut send, recv) = connection.open_bi().await.context("Failed to open stream")?;
        let mut reader = MessageReader::new(recv);

        send_message(
            &mut send,
            &RelayMessage::Control(ControlMessage::Hello {
                role: Role::Device,
                token: self.token.clone(),
            }),
        )
        .await
        .context("Failed to send hello")?;
        info!("Connected to relay at {}", self.relay_addr);

        let (events_tx, mut events_rx) = mpsc::channel::<DeviceEvent>(256);

        let terminal = Arc::new(TerminalManager::new(
            PtySpawner,
            self.terminal_config.clone(),
            events_tx.clone(),
        ));
        let job = Arc::new(JobSupervisor::new(
            self.job_config.clone(),
            events_tx.clone(),
        ));

        let sampler = tokio::spawn(Sampler::new().run(events_tx));

        // Writer task owns the send stream
        let writer = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if let Err(e) = send_message(&mut send, &RelayMessage::Event(event)).await {
                    debug!("Event write failed: {}", e);
                    break;
                }
            }
        });

        // Command dispatch until the link drops
        loop {
            match reader.read_message().await {
                Ok(RelayMessage::Command(cmd)) => dispatch(cmd, &terminal, &job).await,
                Ok(other) => debug!("Ignoring non-command frame: {:?}", other),
                Err(e) => {
                    warn!("Relay link lost: {}", e);
                    break;
                }
            }
        }

        sampler.abort();
        writer.abort();
        terminal.shutdown().await;
        job.shutdown().await;
        Ok(())
    }
}

async fn dispatch(
    cmd: ObserverCommand,
    terminal: &TerminalManager<PtySpawner>,
    job: &JobSupervisor,
) {
    match cmd {
        ObserverCommand::TerminalStart => terminal.start().await,
        ObserverCommand::TerminalInput { data } => match decode_terminal_bytes(&data) {
            Ok(bytes) => terminal.input(&bytes).await,
            Err(e) => warn!("Dropping malformed terminal input: {}", e),
        },
        ObserverCommand::TerminalResize { cols, rows } => terminal.resize(cols, rows).await,
        ObserverCommand::HackingStart { system_prompt } => job.start(system_prompt).await,
        ObserverCommand::HackingStop => job.stop().await,
    }
}
