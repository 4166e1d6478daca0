//! PTY-backed terminal sessions using portable-pty
//!
//! Uses channel-based output streaming with spawn_blocking for the PTY
//! reader: portable-pty reads are blocking and must not run on the Tokio
//! runtime threads.

use async_trait::async_trait;
use blackbox_core::terminal::{Terminal, TerminalConfig, TerminalSpawner};
use blackbox_core::{CoreError, OutputStream, Result};
use bytes::Bytes;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Read;
use tokio::sync::mpsc;

/// One shell process bound to a pseudo-terminal
pub struct PtySession {
    /// PTY master handle, kept for resize
    master: Box<dyn portable_pty::MasterPty + Send>,
    /// Child process handle
    child: Box<dyn portable_pty::Child + Send>,
    /// Writer handle
    writer: Box<dyn std::io::Write + Send>,
}

// The boxed PTY internals are only touched from behind the session lock
unsafe impl Send for PtySession {}

impl PtySession {
    /// Spawn the shell with the explicit environment from `config`
    ///
    /// Returns the session plus the receiving end of its output stream; the
    /// receiver closes when the process exits.
    pub fn spawn(config: &TerminalConfig) -> Result<(Self, mpsc::Receiver<Bytes>)> {
        let pty_system = native_pty_system();

        let pty_size = PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pty_pair = pty_system
            .openpty(pty_size)
            .map_err(|e| CoreError::Terminal(format!("Failed to open PTY: {}", e)))?;

        // Nothing ambient: the shell sees exactly config.env
        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.env_clear();
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.cwd(&config.cwd);

        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::Terminal(format!("Failed to spawn shell: {}", e)))?;

        let writer = pty_pair
            .master
            .take_writer()
            .map_err(|e| CoreError::Terminal(format!("Failed to take PTY writer: {}", e)))?;

        // Bounded output stream (capacity in chunks, creates backpressure)
        let (output_stream, output_rx) = OutputStream::new(1024);
        let output_tx = output_stream.sender();

        let reader = pty_pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::Terminal(format!("Failed to clone PTY reader: {}", e)))?;

        // PTY reader task: blocking read loop off the runtime threads
        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buf = [0u8; 8192];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("PTY reader EOF");
                        break;
                    }
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        // Blocking send is fine on a spawn_blocking thread
                        if output_tx.blocking_send(data).is_err() {
                            tracing::debug!("PTY output stream closed");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!("PTY session spawned with shell {}", config.shell);

        Ok((
            Self {
                master: pty_pair.master,
                child,
                writer,
            },
            output_rx,
        ))
    }
}

impl Terminal for PtySession {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;
        self.writer
            .write_all(data)
            .map_err(|e| CoreError::Terminal(format!("Failed to write to PTY: {}", e)))?;
        self.writer
            .flush()
            .map_err(|e| CoreError::Terminal(format!("Failed to flush PTY writer: {}", e)))?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master
            .resize(size)
            .map_err(|e| CoreError::Terminal(format!("Failed to resize PTY: {}", e)))?;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .map_err(|e| CoreError::Terminal(format!("Failed to kill shell: {}", e)))?;
        Ok(())
    }
}

/// Spawner handing out real PTY sessions
pub struct PtySpawner;

#[async_trait]
impl TerminalSpawner for PtySpawner {
    async fn spawn(
        &self,
        config: &TerminalConfig,
    ) -> Result<(Box<dyn Terminal>, mpsc::Receiver<Bytes>)> {
        let (session, output_rx) = PtySession::spawn(config)?;
        Ok((Box::new(session), output_rx))
    }
}
