//! At-most-one interactive terminal session per device
//!
//! Starting while a session is active supersedes it: the old session's output
//! pump is detached before its process is killed, so no stale output can be
//! emitted once the new session begins. Input and resize events with no
//! active session are dropped without error.

use blackbox_core::terminal::{Terminal, TerminalConfig, TerminalSpawner};
use blackbox_core::types::DeviceEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

struct ActiveSession {
    generation: u64,
    terminal: Box<dyn Terminal>,
    pump: tokio::task::JoinHandle<()>,
}

/// Owner of the single terminal session slot
pub struct TerminalManager<S> {
    spawner: S,
    config: TerminalConfig,
    events_tx: mpsc::Sender<DeviceEvent>,
    slot: Arc<Mutex<Option<ActiveSession>>>,
    generation: AtomicU64,
}

impl<S: TerminalSpawner> TerminalManager<S> {
    pub fn new(spawner: S, config: TerminalConfig, events_tx: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            spawner,
            config,
            events_tx,
            slot: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a fresh session, superseding any active one
    pub async fn start(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.slot.lock().await;

        if let Some(mut old) = slot.take() {
            // Unsubscribe the old output stream before termination so no
            // stale chunk is forwarded after the new session begins
            old.pump.abort();
            if let Err(e) = old.terminal.kill() {
                warn!("Failed to kill superseded session: {}", e);
            }
            info!("Terminated previous terminal session");
        }

        match self.spawner.spawn(&self.config).await {
            Ok((terminal, mut output_rx)) => {
                let events_tx = self.events_tx.clone();
                let slot_ref = Arc::clone(&self.slot);
                let pump = tokio::spawn(async move {
                    while let Some(chunk) = output_rx.recv().await {
                        if events_tx
                            .send(DeviceEvent::terminal_output(&chunk))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    // Output stream closed: the process exited. Clear the
                    // slot unless a newer session already superseded us.
                    let mut slot = slot_ref.lock().await;
                    if slot.as_ref().map(|s| s.generation) == Some(generation) {
                        *slot = None;
                        info!("Terminal session ended");
                    }
                });

                *slot = Some(ActiveSession {
                    generation,
                    terminal,
                    pump,
                });
                info!("Terminal session started");
            }
            Err(e) => {
                error!("Failed to start terminal session: {}", e);
                // Make the failure visible in observer terminals
                let message = format!("failed to start shell: {}\r\n", e);
                let _ = self
                    .events_tx
                    .send(DeviceEvent::terminal_output(message.as_bytes()))
                    .await;
            }
        }
    }

    /// Write input bytes to the active session; dropped when none is active
    pub async fn input(&self, data: &[u8]) {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(session) => {
                if let Err(e) = session.terminal.write(data) {
                    warn!("Terminal write failed: {}", e);
                }
            }
            None => debug!("No terminal session, dropping input"),
        }
    }

    /// Apply new geometry to the active session; dropped when none is active
    pub async fn resize(&self, cols: u16, rows: u16) {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(session) => {
                if let Err(e) = session.terminal.resize(cols, rows) {
                    warn!("Terminal resize failed: {}", e);
                }
            }
            None => debug!("No terminal session, dropping resize"),
        }
    }

    /// Whether a session currently occupies the slot
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Terminate any active session (device link lost or agent shutdown)
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut old) = slot.take() {
            old.pump.abort();
            if let Err(e) = old.terminal.kill() {
                warn!("Failed to kill terminal session on shutdown: {}", e);
            }
            info!("Terminal session terminated on shutdown");
        }
    }
}
