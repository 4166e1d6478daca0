//! Terminal abstraction and spawn configuration
//!
//! The spawner/session trait pair is the seam between the session manager and
//! the PTY backend, so at-most-one-session semantics can be tested without a
//! real shell.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};

/// Spawn configuration for a terminal session
///
/// The environment is explicit rather than inherited: the shell gets exactly
/// the variables listed here, so tool availability does not depend on how the
/// agent process was launched.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Initial columns
    pub cols: u16,

    /// Initial rows
    pub rows: u16,

    /// Shell binary to run
    pub shell: String,

    /// Working directory for the shell
    pub cwd: PathBuf,

    /// Full environment for the shell (nothing else is inherited)
    pub env: Vec<(String, String)>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let cwd = PathBuf::from("/root");
        Self {
            cols: 80,
            rows: 24,
            shell: Self::default_shell(),
            env: Self::sanitized_env(&cwd),
            cwd,
        }
    }
}

impl TerminalConfig {
    #[cfg(unix)]
    fn default_shell() -> String {
        "/bin/bash".to_string()
    }

    #[cfg(windows)]
    fn default_shell() -> String {
        "cmd.exe".to_string()
    }

    /// Explicit PATH/HOME/TERM for the given home directory
    pub fn sanitized_env(home: &std::path::Path) -> Vec<(String, String)> {
        vec![
            (
                "PATH".to_string(),
                "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            ),
            ("HOME".to_string(), home.display().to_string()),
            ("TERM".to_string(), "xterm-256color".to_string()),
        ]
    }

    /// Create with custom size
    pub fn with_size(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            ..Default::default()
        }
    }

    /// Set custom shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the working directory, re-deriving HOME to match
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.env = Self::sanitized_env(&cwd);
        self.cwd = cwd;
        self
    }
}

/// A live terminal session
pub trait Terminal: Send {
    /// Write input bytes to the shell
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Apply new geometry to the pseudo-terminal
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    /// Terminate the backing process
    fn kill(&mut self) -> Result<()>;
}

/// Factory for terminal sessions
///
/// Returns the session handle plus the receiving end of its output stream;
/// the receiver yields chunks in emission order and closes on process exit.
#[async_trait]
pub trait TerminalSpawner: Send + Sync {
    async fn spawn(
        &self,
        config: &TerminalConfig,
    ) -> Result<(Box<dyn Terminal>, mpsc::Receiver<Bytes>)>;
}

// ===== Test doubles =====

/// Recorded interactions of one mock session
#[derive(Debug, Default)]
pub struct MockTerminalState {
    pub writes: Vec<Vec<u8>>,
    pub resizes: Vec<(u16, u16)>,
    pub killed: bool,
}

/// Mock terminal recording all interactions
pub struct MockTerminal {
    state: Arc<Mutex<MockTerminalState>>,
}

impl Terminal for MockTerminal {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.killed {
            return Err(CoreError::Terminal("terminal is dead".into()));
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.killed {
            return Err(CoreError::Terminal("terminal is dead".into()));
        }
        state.resizes.push((cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.state.lock().unwrap().killed = true;
        Ok(())
    }
}

/// Handle to one session produced by [`MockSpawner`]
pub struct SpawnedMock {
    pub state: Arc<Mutex<MockTerminalState>>,
    /// Feed fake shell output; dropping all senders simulates process exit
    pub output_tx: Option<mpsc::Sender<Bytes>>,
}

/// Mock spawner handing out [`MockTerminal`] sessions
#[derive(Default)]
pub struct MockSpawner {
    sessions: Arc<Mutex<Vec<SpawnedMock>>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next spawn call fail
    pub fn fail_next(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of sessions spawned so far
    pub fn spawned_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// State handle of the n-th spawned session
    pub fn session_state(&self, index: usize) -> Arc<Mutex<MockTerminalState>> {
        self.sessions.lock().unwrap()[index].state.clone()
    }

    /// Output sender of the n-th spawned session
    pub fn output_sender(&self, index: usize) -> mpsc::Sender<Bytes> {
        self.sessions.lock().unwrap()[index]
            .output_tx
            .clone()
            .expect("output already closed")
    }

    /// Drop the stored output sender, simulating process exit once no other
    /// sender clones remain
    pub fn close_output(&self, index: usize) {
        self.sessions.lock().unwrap()[index].output_tx = None;
    }
}

#[async_trait]
impl TerminalSpawner for MockSpawner {
    async fn spawn(
        &self,
        _config: &TerminalConfig,
    ) -> Result<(Box<dyn Terminal>, mpsc::Receiver<Bytes>)> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Terminal("mock spawn failure".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(MockTerminalState::default()));
        self.sessions.lock().unwrap().push(SpawnedMock {
            state: state.clone(),
            output_tx: Some(tx),
        });
        Ok((Box::new(MockTerminal { state }), rx))
    }
}
