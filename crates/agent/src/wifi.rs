//! Wi-Fi discovery and join, plus the provisioning state machine
//!
//! The provisioning channel is pull-based and eventually consistent: a scan
//! trigger never blocks the caller, and a list read made before discovery
//! completes sees stale or empty results. The scanner trait is the seam
//! between the protocol and NetworkManager, so the state machine is testable
//! without radio hardware.

use async_trait::async_trait;
use blackbox_core::types::{dedup_networks, ConnectRequest, NetworkRecord, ProvisioningStatus};
use blackbox_core::{CoreError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Network discovery and join operations
#[async_trait]
pub trait NetworkScanner: Send + Sync {
    /// Discover nearby networks
    async fn scan(&self) -> Result<Vec<NetworkRecord>>;

    /// Attempt to join the named network
    async fn join(&self, ssid: &str, password: Option<&str>) -> ProvisioningStatus;

    /// Probe current connectivity (for status reads before any join attempt)
    async fn link_status(&self) -> ProvisioningStatus;
}

/// Scanner backed by NetworkManager's nmcli
pub struct NmcliScanner;

#[async_trait]
impl NetworkScanner for NmcliScanner {
    async fn scan(&self) -> Result<Vec<NetworkRecord>> {
        let output = Command::new("nmcli")
            .args([
                "-t",
                "-f",
                "SSID,SIGNAL,SECURITY",
                "device",
                "wifi",
                "list",
                "--rescan",
                "yes",
            ])
            .output()
            .await
            .map_err(|e| CoreError::Wifi(format!("nmcli scan failed: {}", e)))?;

        if !output.status.success() {
            return Err(CoreError::Wifi(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_scan_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn join(&self, ssid: &str, password: Option<&str>) -> ProvisioningStatus {
        let mut cmd = Command::new("nmcli");
        cmd.args(["device", "wifi", "connect", ssid]);
        if let Some(password) = password {
            cmd.args(["password", password]);
        }

        match cmd.output().await {
            Ok(output) if output.status.success() => {
                // Address assignment lags the association
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.link_status().await
            }
            Ok(output) => ProvisioningStatus::failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(e) => ProvisioningStatus::failed(e.to_string()),
        }
    }

    async fn link_status(&self) -> ProvisioningStatus {
        match crate::telemetry::local_ip() {
            Some(ip) => ProvisioningStatus::joined(ip.to_string()),
            None => ProvisioningStatus::default(),
        }
    }
}

/// Parse `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list` output
fn parse_scan_output(stdout: &str) -> Vec<NetworkRecord> {
    let records = stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let ssid = parts.next()?.to_string();
            let signal = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let secure = parts.next().map(|s| !s.is_empty()).unwrap_or(false);
            Some(NetworkRecord {
                ssid,
                signal,
                secure,
            })
        })
        .collect();
    dedup_networks(records)
}

/// Provisioning protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningPhase {
    Idle,
    Scanning,
    ScanComplete,
    Connecting,
    ConnectComplete,
}

struct ProvisionerState {
    phase: ProvisioningPhase,
    networks: Vec<NetworkRecord>,
    status: Option<ProvisioningStatus>,
    scan_generation: u64,
}

/// The device-side provisioning session
///
/// Only one attempt proceeds at a time; a new scan silently discards an
/// in-flight one's results by bumping the generation counter.
pub struct Provisioner {
    scanner: Arc<dyn NetworkScanner>,
    state: Arc<Mutex<ProvisionerState>>,
}

impl Provisioner {
    pub fn new(scanner: Arc<dyn NetworkScanner>) -> Self {
        Self {
            scanner,
            state: Arc::new(Mutex::new(ProvisionerState {
                phase: ProvisioningPhase::Idle,
                networks: Vec::new(),
                status: None,
                scan_generation: 0,
            })),
        }
    }

    /// Trigger asynchronous discovery; returns immediately
    ///
    /// The cached record set is replaced wholesale with deduplicated results
    /// once discovery completes. A failed scan keeps the stale cache.
    pub async fn trigger_scan(&self) {
        let generation = {
            let mut state = self.state.lock().await;
            state.scan_generation += 1;
            state.phase = ProvisioningPhase::Scanning;
            state.scan_generation
        };

        let scanner = Arc::clone(&self.scanner);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let result = scanner.scan().await;

            let mut state = state.lock().await;
            if state.scan_generation != generation {
                debug!("Discarding results of superseded scan");
                return;
            }
            match result {
                Ok(networks) => {
                    let networks = dedup_networks(networks);
                    info!("Scan complete: {} networks", networks.len());
                    state.networks = networks;
                }
                Err(e) => warn!("Scan failed, keeping stale cache: {}", e),
            }
            state.phase = ProvisioningPhase::ScanComplete;
        });
    }

    /// The cached record set; stale or empty until a scan completes
    pub async fn list_networks(&self) -> Vec<NetworkRecord> {
        self.state.lock().await.networks.clone()
    }

    /// Begin a join attempt; the outcome becomes visible through status reads
    pub async fn connect(&self, request: ConnectRequest) {
        {
            let mut state = self.state.lock().await;
            state.phase = ProvisioningPhase::Connecting;
        }
        info!("Joining network {}", request.ssid);

        let scanner = Arc::clone(&self.scanner);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let outcome = scanner
                .join(&request.ssid, request.password.as_deref())
                .await;

            let mut state = state.lock().await;
            state.status = Some(outcome);
            state.phase = ProvisioningPhase::ConnectComplete;
        });
    }

    /// Last known join outcome; before any attempt, the live link status
    pub async fn status(&self) -> ProvisioningStatus {
        let known = self.state.lock().await.status.clone();
        match known {
            Some(status) => status,
            None => self.scanner.link_status().await,
        }
    }

    pub async fn phase(&self) -> ProvisioningPhase {
        self.state.lock().await.phase
    }
}
