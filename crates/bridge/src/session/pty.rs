//! PTY process handle.
//!
//! This module wraps one spawned interactive shell bound to a
//! pseudo-terminal. The handle exposes exactly the operations a session
//! needs: write input, consume the output stream, resize, and terminate.
//! Output is delivered through a bounded channel fed by a dedicated reader
//! thread; when the consumer stalls, the reader blocks rather than dropping
//! shell output.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SessionConfig;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Interval between exit-status polls while waiting on the child.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur during process handle operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to spawn the shell on a PTY.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// Failed to write to the shell's input.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the child process.
    #[error("failed to signal process {pid}: {reason}")]
    SignalFailed {
        /// Process that was being signalled.
        pid: u32,
        /// Underlying errno description.
        reason: String,
    },

    /// The process has already terminated.
    #[error("process already terminated")]
    AlreadyTerminated,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Final status of a terminated shell process, recorded exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The shell exited on its own (or after a graceful interrupt).
    Exited(u32),
    /// The shell ignored the graceful interrupt and was force-killed.
    Killed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Exited(code) => write!(f, "exited with code {}", code),
            ProcessStatus::Killed => write!(f, "killed after grace period"),
        }
    }
}

/// Current pseudo-terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyDimensions {
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

/// One spawned interactive shell bound to a pseudo-terminal.
///
/// The handle is owned exclusively by its session; no other code reads
/// from or writes to the process. All exit paths converge on
/// [`ProcessHandle::terminate`], which is idempotent: terminating an
/// already-exited process is a no-op that returns the recorded status.
pub struct ProcessHandle {
    /// OS process id of the shell, used for signalling and logging.
    pid: Option<u32>,

    /// The PTY master, used for resize.
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,

    /// The PTY input writer.
    writer: Arc<Mutex<Box<dyn Write + Send>>>,

    /// The child process, used for reaping.
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,

    /// Current terminal size.
    dimensions: Mutex<PtyDimensions>,

    /// Exit status, set exactly once when the process is reaped.
    exit_status: Mutex<Option<ProcessStatus>>,

    /// Reader thread feeding the output channel.
    reader_thread: Option<std::thread::JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawns the configured shell on a new PTY.
    ///
    /// The shell inherits the bridge process's environment and working
    /// directory; only `TERM` is overridden from configuration. The PTY is
    /// opened at the configured fixed size.
    ///
    /// Returns the handle and the produced-output stream: a bounded channel
    /// fed by a dedicated reader thread. The thread uses a blocking send,
    /// so a full channel stalls the output pump instead of discarding data.
    pub fn spawn(
        config: &SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // CommandBuilder captures the host environment and working
        // directory; the spawned shell runs with the bridge's privileges.
        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.env("TERM", &config.term);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::channel(config.output_buffer);

        let reader_thread = std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || {
                let mut buffer = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => break, // EOF, process exited
                        Ok(n) => {
                            // blocking_send stalls here when the session's
                            // outbound path is saturated.
                            if output_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                                break; // receiver dropped, session torn down
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(_) => break, // PTY closed underneath us
                    }
                }
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        tracing::debug!(
            pid = ?pid,
            shell = %config.shell,
            cols = config.cols,
            rows = config.rows,
            "Spawned shell on PTY"
        );

        let handle = ProcessHandle {
            pid,
            master: Arc::new(Mutex::new(pair.master)),
            writer: Arc::new(Mutex::new(writer)),
            child: Arc::new(Mutex::new(child)),
            dimensions: Mutex::new(PtyDimensions {
                cols: config.cols,
                rows: config.rows,
            }),
            exit_status: Mutex::new(None),
            reader_thread: Some(reader_thread),
        };

        Ok((handle, output_rx))
    }

    /// Returns the shell's process id, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current terminal dimensions.
    pub fn dimensions(&self) -> PtyDimensions {
        *self.dimensions.lock().unwrap()
    }

    /// Returns the recorded exit status, or `None` while running.
    pub fn status(&self) -> Option<ProcessStatus> {
        *self.exit_status.lock().unwrap()
    }

    /// Writes bytes verbatim to the shell's input.
    ///
    /// The write is fully drained (write + flush) before returning, so
    /// consecutive inbound messages never interleave. Runs on the blocking
    /// pool because PTY writes can stall when the shell is not reading.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.status().is_some() {
            return Err(SessionError::AlreadyTerminated);
        }
        if data.is_empty() {
            return Ok(());
        }

        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap();
            writer.write_all(&data)?;
            writer.flush()?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| SessionError::WriteFailed(e.to_string()))?
        .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Resizes the PTY to the given dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if self.status().is_some() {
            return Err(SessionError::AlreadyTerminated);
        }

        self.master
            .lock()
            .unwrap()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        *self.dimensions.lock().unwrap() = PtyDimensions { cols, rows };

        tracing::debug!(pid = ?self.pid, cols, rows, "Resized PTY");
        Ok(())
    }

    /// Checks whether the child has exited, recording its status if so.
    ///
    /// Does not wait; returns `None` while the process is still running.
    pub fn try_wait(&self) -> Result<Option<ProcessStatus>, SessionError> {
        if let Some(status) = self.status() {
            return Ok(Some(status));
        }

        let mut child = self.child.lock().unwrap();
        match child.try_wait()? {
            Some(exit) => {
                let status = ProcessStatus::Exited(exit.exit_code());
                Ok(Some(self.record(status)))
            }
            None => Ok(None),
        }
    }

    /// Terminates the shell and reaps it, returning the final status.
    ///
    /// Sends a graceful interrupt (SIGTERM) first, waits up to `grace` for
    /// the shell to flush and exit, then escalates to SIGKILL. Idempotent:
    /// calling this against an already-exited or already-terminated process
    /// returns the recorded status without error.
    pub async fn terminate(&self, grace: Duration) -> Result<ProcessStatus, SessionError> {
        if let Some(status) = self.status() {
            return Ok(status);
        }

        // The shell may already have exited on its own; reap without
        // signalling in that case.
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }

        self.signal(Signal::SIGTERM)?;

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if let Some(status) = self.try_wait()? {
                tracing::debug!(pid = ?self.pid, %status, "Shell exited within grace period");
                return Ok(status);
            }
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }

        tracing::warn!(pid = ?self.pid, "Grace period elapsed, force-killing shell");
        self.signal(Signal::SIGKILL)?;

        // SIGKILL cannot be ignored; reap on the blocking pool.
        let child = Arc::clone(&self.child);
        tokio::task::spawn_blocking(move || {
            let mut child = child.lock().unwrap();
            child.wait()
        })
        .await
        .map_err(|e| SessionError::Io(std::io::Error::other(e)))??;

        Ok(self.record(ProcessStatus::Killed))
    }

    /// Records the exit status, keeping the first value if already set.
    fn record(&self, status: ProcessStatus) -> ProcessStatus {
        let mut guard = self.exit_status.lock().unwrap();
        *guard.get_or_insert(status)
    }

    /// Sends a signal to the child. Signalling an already-exited process
    /// (ESRCH) is a no-op, not an error.
    fn signal(&self, signal: Signal) -> Result<(), SessionError> {
        let Some(pid) = self.pid else {
            // No pid available; fall back to the PTY-level kill.
            let mut child = self.child.lock().unwrap();
            return child.kill().map_err(SessionError::Io);
        };

        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(SessionError::SignalFailed {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Backstop: every normal exit path reaps via terminate(), but a
        // panicking session must not leak a process-table entry.
        if self.status().is_none() {
            let _ = self.signal(Signal::SIGKILL);
            if let Ok(mut child) = self.child.lock() {
                let _ = child.wait();
            }
        }
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}
