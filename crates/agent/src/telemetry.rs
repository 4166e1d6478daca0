//! Periodic system metrics sampling
//!
//! One snapshot every two seconds on the `stats` channel. A metric that
//! cannot be sampled degrades to its zero/default value; a partial snapshot
//! is always better than none.

use blackbox_core::types::{
    DeviceEvent, DiskUsage, MemoryUsage, NetworkIdentity, TelemetrySnapshot,
};
use std::net::{IpAddr, UdpSocket};
use sysinfo::{Components, Disks, System};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// Reference sampling cadence
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// System metrics sampler
pub struct Sampler {
    system: System,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Take one snapshot
    pub fn sample(&mut self) -> TelemetrySnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = Some(self.system.global_cpu_usage() as f64);
        let memory = Some(MemoryUsage {
            used: self.system.used_memory(),
            total: self.system.total_memory(),
        });
        let disk = root_disk_usage();
        let temperature = primary_temperature();
        let uptime = Some(System::uptime());
        let network = Some(NetworkIdentity {
            ip: local_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        });

        merge_snapshot(cpu, memory, disk, temperature, uptime, network)
    }

    /// Emit snapshots on the fixed cadence until the event channel closes
    pub async fn run(mut self, events_tx: mpsc::Sender<DeviceEvent>) {
        let mut ticker = interval(SAMPLE_INTERVAL);
        loop {
            ticker.tick().await;
            let snapshot = self.sample();
            if events_tx.send(DeviceEvent::Stats(snapshot)).await.is_err() {
                break;
            }
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble a snapshot from independently sampled metrics, degrading each
/// missing one to its zero/default value
fn merge_snapshot(
    cpu: Option<f64>,
    memory: Option<MemoryUsage>,
    disk: Option<DiskUsage>,
    temperature: Option<f32>,
    uptime: Option<u64>,
    network: Option<NetworkIdentity>,
) -> TelemetrySnapshot {
    TelemetrySnapshot {
        cpu: cpu.unwrap_or_default(),
        memory: memory.unwrap_or_default(),
        disk: disk.unwrap_or_default(),
        temperature: temperature.unwrap_or_default(),
        uptime: uptime.unwrap_or_default(),
        network: network.unwrap_or_default(),
    }
}

/// Usage of the filesystem mounted at `/`, falling back to the first disk
fn root_disk_usage() -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let list = disks.list();
    list.iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| list.first())
        .map(|d| DiskUsage {
            used: d.total_space().saturating_sub(d.available_space()),
            total: d.total_space(),
        })
}

/// First temperature sensor that reports a reading
fn primary_temperature() -> Option<f32> {
    let components = Components::new_with_refreshed_list();
    components.list().iter().find_map(|c| c.temperature())
}

/// Local LAN address via the UDP-connect trick
///
/// Connecting a UDP socket sends no packets; it only asks the kernel which
/// interface would route to the target.
pub(crate) fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    match ip {
        IpAddr::V4(v4) if v4.is_loopback() || v4.is_unspecified() => None,
        _ => Some(ip),
    }
}
