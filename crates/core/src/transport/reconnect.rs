//! Reconnection with exponential backoff
//!
//! The device agent reconnects to the relay indefinitely by default: the
//! relay may restart at any time and the device has no operator to restart
//! it manually.

use quinn::{Connection, Endpoint};
use std::time::Duration;
use tokio::time::sleep;

use crate::{CoreError, Result};

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum backoff time between attempts
    pub max_backoff: Duration,
    /// Initial backoff time
    pub initial_backoff: Duration,
    /// Maximum number of attempts (None = retry forever)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Connect with exponential backoff: 1s, 2s, 4s, ... capped at `max_backoff`
///
/// `server_name` is the SNI name the relay's certificate was issued for.
pub async fn reconnect_with_backoff(
    endpoint: &Endpoint,
    addr: std::net::SocketAddr,
    server_name: &str,
    config: &ReconnectConfig,
) -> Result<Connection> {
    let mut backoff = config.initial_backoff;
    let mut attempt = 0usize;

    loop {
        attempt += 1;

        let result = match endpoint.connect(addr, server_name) {
            Ok(connecting) => connecting.await.map_err(CoreError::from),
            Err(e) => Err(CoreError::Connection(format!(
                "Failed to initiate connection: {}",
                e
            ))),
        };

        match result {
            Ok(conn) => {
                if attempt > 1 {
                    tracing::info!("Reconnected after {} attempts", attempt);
                }
                return Ok(conn);
            }
            Err(e) => {
                if let Some(max) = config.max_attempts {
                    if attempt >= max {
                        return Err(CoreError::Connection(format!(
                            "Max reconnection attempts ({}) reached. Last error: {}",
                            max, e
                        )));
                    }
                }

                tracing::warn!(
                    "Connect attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    backoff
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
