//! Wireless network records exchanged over the provisioning channel

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One discovered wireless network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub ssid: String,
    /// Signal quality, 0-100
    pub signal: u8,
    pub secure: bool,
}

/// Deduplicate scan results by ssid, first occurrence wins
///
/// Hidden networks (empty ssid) are dropped.
pub fn dedup_networks(records: Vec<NetworkRecord>) -> Vec<NetworkRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| !r.ssid.is_empty() && seen.insert(r.ssid.clone()))
        .collect()
}

/// Payload written to the provisioning connect characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Last known join outcome, read from the provisioning status characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProvisioningStatus {
    pub connected: bool,
    pub ip: Option<String>,
    pub error: Option<String>,
}

impl ProvisioningStatus {
    pub fn joined(ip: impl Into<String>) -> Self {
        Self {
            connected: true,
            ip: Some(ip.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            ip: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(ssid: &str, signal: u8) -> NetworkRecord {
        NetworkRecord {
            ssid: ssid.to_string(),
            signal,
            secure: true,
        }
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let records = vec![record("A", 80), record("A", 40), record("B", 60)];
        let deduped = dedup_networks(records);
        assert_eq!(deduped, vec![record("A", 80), record("B", 60)]);
    }

    #[test]
    fn test_dedup_drops_hidden_networks() {
        let records = vec![record("", 90), record("lab", 50)];
        assert_eq!(dedup_networks(records), vec![record("lab", 50)]);
    }

    #[test]
    fn test_connect_request_password_optional() {
        let req: ConnectRequest = serde_json::from_value(json!({"ssid": "open-net"})).unwrap();
        assert_eq!(req.ssid, "open-net");
        assert_eq!(req.password, None);
    }

    #[test]
    fn test_status_wire_shape() {
        assert_eq!(
            serde_json::to_value(ProvisioningStatus::joined("10.0.0.7")).unwrap(),
            json!({"connected": true, "ip": "10.0.0.7", "error": null})
        );
        assert_eq!(
            serde_json::to_value(ProvisioningStatus::default()).unwrap(),
            json!({"connected": false, "ip": null, "error": null})
        );
    }
}
