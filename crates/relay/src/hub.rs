//! The relay hub: device singleton, observer set, store-and-forward routing
//!
//! All connection lifecycle transitions and routing decisions happen under
//! one mutex, so no broadcast can reach an already-removed observer or miss
//! one added strictly before the event was emitted. Payloads are never
//! inspected beyond the envelope.

use blackbox_core::types::{ControlMessage, DeviceEvent, ObserverCommand, RelayMessage};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Outbound queue capacity per connection
const OUTBOUND_QUEUE: usize = 256;

struct DeviceSlot {
    id: u64,
    tx: mpsc::Sender<RelayMessage>,
}

#[derive(Default)]
struct HubState {
    device: Option<DeviceSlot>,
    observers: HashMap<u64, mpsc::Sender<RelayMessage>>,
    next_id: u64,
}

impl HubState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn broadcast(&self, msg: RelayMessage) {
        for (id, tx) in &self.observers {
            if tx.try_send(msg.clone()).is_err() {
                warn!("Observer {} queue full, dropping message", id);
            }
        }
    }
}

/// Top-level coordinator owning the one device connection and the set of
/// observer connections
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
        }
    }

    /// Create an outbound queue for a new connection
    pub fn outbound_queue() -> (mpsc::Sender<RelayMessage>, mpsc::Receiver<RelayMessage>) {
        mpsc::channel(OUTBOUND_QUEUE)
    }

    /// Register an authenticated device connection
    ///
    /// The newest authenticated device takes the singleton slot; the replaced
    /// occupant's sender is returned so the caller can close that connection.
    /// Every current observer is told `pi:online`.
    pub async fn register_device(
        &self,
        tx: mpsc::Sender<RelayMessage>,
    ) -> (u64, Option<mpsc::Sender<RelayMessage>>) {
        let mut state = self.state.lock().await;
        let id = state.alloc_id();
        let replaced = state.device.replace(DeviceSlot { id, tx });
        if replaced.is_some() {
            info!("Device connected, replacing previous occupant");
        } else {
            info!("Device connected");
        }
        state.broadcast(RelayMessage::Control(ControlMessage::PiOnline));
        (id, replaced.map(|slot| slot.tx))
    }

    /// Clear the singleton when its current occupant disconnects
    ///
    /// A replaced device's late disconnect must not evict its successor, so
    /// the slot is only cleared when the connection id still matches.
    pub async fn unregister_device(&self, id: u64) {
        let mut state = self.state.lock().await;
        match &state.device {
            Some(slot) if slot.id == id => {
                state.device = None;
                info!("Device disconnected");
                state.broadcast(RelayMessage::Control(ControlMessage::PiOffline));
            }
            _ => debug!("Ignoring disconnect of superseded device connection {}", id),
        }
    }

    /// Add an authenticated observer connection
    ///
    /// The new observer is immediately told the current device availability;
    /// there is no replay of earlier telemetry or logs.
    pub async fn register_observer(&self, tx: mpsc::Sender<RelayMessage>) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.alloc_id();

        let status = if state.device.is_some() {
            ControlMessage::PiOnline
        } else {
            ControlMessage::PiOffline
        };
        let _ = tx.try_send(RelayMessage::Control(status));

        state.observers.insert(id, tx);
        info!("Observer {} connected ({} total)", id, state.observers.len());
        id
    }

    /// Remove an observer connection; no side effects on anyone else
    pub async fn unregister_observer(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.observers.remove(&id);
        info!(
            "Observer {} disconnected ({} remain)",
            id,
            state.observers.len()
        );
    }

    /// Forward an observer command to the device connection
    ///
    /// With no device connected the command is silently dropped; observers
    /// already know from `pi:offline` that nobody is listening.
    pub async fn forward_to_device(&self, cmd: ObserverCommand) {
        let state = self.state.lock().await;
        match &state.device {
            Some(slot) => {
                if slot.tx.try_send(RelayMessage::Command(cmd)).is_err() {
                    warn!("Device queue full, dropping command");
                }
            }
            None => debug!("No device connected, dropping command"),
        }
    }

    /// Broadcast a device event to every connected observer
    pub async fn broadcast_event(&self, event: DeviceEvent) {
        let state = self.state.lock().await;
        state.broadcast(RelayMessage::Event(event));
    }

    /// Current device availability
    pub async fn device_online(&self) -> bool {
        self.state.lock().await.device.is_some()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_core::types::JobStatus;

    async fn drain(rx: &mut mpsc::Receiver<RelayMessage>) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_device_online_notifies_every_observer() {
        let hub = Hub::new();
        let (tx1, mut rx1) = Hub::outbound_queue();
        let (tx2, mut rx2) = Hub::outbound_queue();
        hub.register_observer(tx1).await;
        hub.register_observer(tx2).await;

        // Both observers were told the device is offline on join
        assert_eq!(
            drain(&mut rx1).await,
            vec![RelayMessage::Control(ControlMessage::PiOffline)]
        );
        drain(&mut rx2).await;

        let (dev_tx, _dev_rx) = Hub::outbound_queue();
        hub.register_device(dev_tx).await;

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(
                drain(rx).await,
                vec![RelayMessage::Control(ControlMessage::PiOnline)],
                "exactly one pi:online per observer"
            );
        }
    }

    #[tokio::test]
    async fn test_device_disconnect_notifies_offline() {
        let hub = Hub::new();
        let (obs_tx, mut obs_rx) = Hub::outbound_queue();
        hub.register_observer(obs_tx).await;

        let (dev_tx, _dev_rx) = Hub::outbound_queue();
        let (id, _) = hub.register_device(dev_tx).await;
        drain(&mut obs_rx).await;

        hub.unregister_device(id).await;
        assert!(!hub.device_online().await);
        assert_eq!(
            drain(&mut obs_rx).await,
            vec![RelayMessage::Control(ControlMessage::PiOffline)]
        );
    }

    #[tokio::test]
    async fn test_observer_joining_while_online_sees_online() {
        let hub = Hub::new();
        let (dev_tx, _dev_rx) = Hub::outbound_queue();
        hub.register_device(dev_tx).await;

        let (obs_tx, mut obs_rx) = Hub::outbound_queue();
        hub.register_observer(obs_tx).await;
        assert_eq!(
            drain(&mut obs_rx).await,
            vec![RelayMessage::Control(ControlMessage::PiOnline)]
        );
    }

    #[tokio::test]
    async fn test_newest_device_replaces_prior_occupant() {
        let hub = Hub::new();
        let (first_tx, mut first_rx) = Hub::outbound_queue();
        let (first_id, replaced) = hub.register_device(first_tx).await;
        assert!(replaced.is_none());

        let (second_tx, mut second_rx) = Hub::outbound_queue();
        let (_, replaced) = hub.register_device(second_tx).await;
        assert!(replaced.is_some(), "prior occupant handed back for closing");

        // Commands now reach only the new device
        hub.forward_to_device(ObserverCommand::TerminalStart).await;
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());

        // The superseded connection's late disconnect is a no-op
        let (obs_tx, mut obs_rx) = Hub::outbound_queue();
        hub.register_observer(obs_tx).await;
        drain(&mut obs_rx).await;
        hub.unregister_device(first_id).await;
        assert!(hub.device_online().await);
        assert!(drain(&mut obs_rx).await.is_empty(), "no spurious pi:offline");
    }

    #[tokio::test]
    async fn test_commands_without_device_are_silently_dropped() {
        let hub = Hub::new();
        let (obs_tx, mut obs_rx) = Hub::outbound_queue();
        hub.register_observer(obs_tx).await;
        drain(&mut obs_rx).await;

        hub.forward_to_device(ObserverCommand::HackingStart {
            system_prompt: None,
        })
        .await;
        hub.forward_to_device(ObserverCommand::terminal_input(b"ls\n"))
            .await;

        // Nothing delivered anywhere, no error raised
        assert!(drain(&mut obs_rx).await.is_empty());
        assert!(!hub.device_online().await);
    }

    #[tokio::test]
    async fn test_events_broadcast_to_all_observers() {
        let hub = Hub::new();
        let (tx1, mut rx1) = Hub::outbound_queue();
        let (tx2, mut rx2) = Hub::outbound_queue();
        hub.register_observer(tx1).await;
        let second = hub.register_observer(tx2).await;
        drain(&mut rx1).await;
        drain(&mut rx2).await;

        hub.broadcast_event(DeviceEvent::HackingStatus(JobStatus::Running))
            .await;
        assert_eq!(drain(&mut rx1).await.len(), 1);
        assert_eq!(drain(&mut rx2).await.len(), 1);

        // A removed observer gets nothing further
        hub.unregister_observer(second).await;
        hub.broadcast_event(DeviceEvent::terminal_output(b"x")).await;
        assert_eq!(drain(&mut rx1).await.len(), 1);
        assert!(drain(&mut rx2).await.is_empty());
    }

    #[tokio::test]
    async fn test_events_forwarded_verbatim() {
        let hub = Hub::new();
        let (obs_tx, mut obs_rx) = Hub::outbound_queue();
        hub.register_observer(obs_tx).await;
        drain(&mut obs_rx).await;

        let event = DeviceEvent::terminal_output(b"\x1b[1mok\x1b[0m\r\n");
        hub.broadcast_event(event.clone()).await;
        assert_eq!(
            drain(&mut obs_rx).await,
            vec![RelayMessage::Event(event)]
        );
    }
}
