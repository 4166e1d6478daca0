//! QUIC transport configuration helpers
//!
//! Shared client/server settings: keep-alive so NAT mappings stay warm while
//! the device idles between telemetry ticks, and an idle timeout that detects
//! a dead peer without waiting on TCP-style half-open sockets.

pub mod reconnect;
pub mod stream;

pub use reconnect::{reconnect_with_backoff, ReconnectConfig};
pub use stream::{send_message, MessageReader};

use quinn::{ClientConfig, ServerConfig, TransportConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::{CoreError, Result};

/// Idle timeout shared by both sides; a vanished peer is declared dead after
/// this long without traffic
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive interval; must stay well below NAT mapping timeouts
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

fn transport_config() -> Result<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.max_idle_timeout(Some(
        IDLE_TIMEOUT
            .try_into()
            .map_err(|_| CoreError::Protocol("idle timeout out of range".into()))?,
    ));
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    Ok(transport)
}

/// Configure a QUIC client endpoint (device agent side)
pub fn configure_client(
    crypto_config: Arc<quinn::crypto::rustls::QuicClientConfig>,
) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(crypto_config);
    config.transport_config(Arc::new(transport_config()?));
    Ok(config)
}

/// Configure the QUIC server endpoint (relay side)
pub fn configure_server(
    cert: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig> {
    let mut config = ServerConfig::with_single_cert(cert, key)
        .map_err(|e| CoreError::Protocol(format!("Failed to configure TLS: {}", e)))?;
    config.transport_config(Arc::new(transport_config()?));
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_server_with_self_signed_cert() {
        let cert = rcgen::generate_simple_self_signed(["localhost".to_string()]).unwrap();
        let cert_der = rustls::pki_types::CertificateDer::from(cert.cert);
        let key_der = rustls::pki_types::PrivateKeyDer::Pkcs8(
            rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()),
        );

        assert!(configure_server(vec![cert_der], key_der).is_ok());
    }
}
