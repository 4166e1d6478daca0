//! Domain types for relay traffic

mod job;
mod message;
mod telemetry;
mod wifi;

pub use job::{JobEvent, JobEventKind, JobStatus};
pub use message::{decode_terminal_bytes, ControlMessage, DeviceEvent, ObserverCommand, RelayMessage};
pub use telemetry::{DiskUsage, MemoryUsage, NetworkIdentity, TelemetrySnapshot};
pub use wifi::{dedup_networks, ConnectRequest, NetworkRecord, ProvisioningStatus};
