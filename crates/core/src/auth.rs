//! Credential validation for device and observer connections
//!
//! Two independently configured secrets guard the relay: a pre-shared device
//! token compared for exact equality, and an observer password from which
//! login tokens are derived.
//!
//! ## Security Note: suffix-based observer tokens
//!
//! An observer token is `base64(timestamp ++ password)` and is validated by
//! checking that the decoded text *ends with* the configured password. The
//! check is length-unbounded, carries no expiry and no signature. It is kept
//! for wire compatibility with existing clients; replacing it with a signed,
//! expiring token is the known hardening candidate (see DESIGN.md).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection role presented in the hello frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Device,
    Observer,
}

/// Shared-secret gate for both connection roles
///
/// A failed check closes the connection with no response frame and retains
/// no handshake state. There is no rate limiting and no lockout.
#[derive(Debug, Clone)]
pub struct AuthGate {
    device_token: String,
    observer_password: String,
}

impl AuthGate {
    /// Create a gate from the two configured secrets
    pub fn new(device_token: impl Into<String>, observer_password: impl Into<String>) -> Self {
        Self {
            device_token: device_token.into(),
            observer_password: observer_password.into(),
        }
    }

    /// Validate a presented credential for the given role
    pub fn authenticate(&self, role: Role, credential: &str) -> bool {
        match role {
            Role::Device => credential == self.device_token,
            Role::Observer => self.validate_observer_token(credential),
        }
    }

    /// Mint an observer token: `base64(timestamp ++ password)`
    ///
    /// Mirrors the login endpoint's token format so clients minted elsewhere
    /// validate here.
    pub fn issue_observer_token(&self) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        BASE64.encode(format!("{}{}", timestamp, self.observer_password))
    }

    fn validate_observer_token(&self, token: &str) -> bool {
        let Ok(bytes) = BASE64.decode(token) else {
            return false;
        };
        match String::from_utf8(bytes) {
            Ok(decoded) => decoded.ends_with(&self.observer_password),
            Err(_) => false,
        }
    }
}
