//! Handle to one spawned engine process.
//!
//! Owns the child and both ends of its stdio. Reads are always bounded by a
//! caller-supplied wait so that an unresponsive worker can be abandoned.

use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// Result of one bounded read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// `n` bytes were placed at the front of the buffer
    Bytes(usize),
    /// Nothing arrived within the wait
    Idle,
    /// The worker closed its output stream
    Eof,
}

/// An exclusively owned engine process
pub struct WorkerProcess {
    /// Handle to the spawned process
    child: Child,

    stdin: ChildStdin,

    stdout: ChildStdout,

    pid: Option<u32>,

    /// Cleared once end-of-stream or an exit status is observed
    alive: bool,

    /// Set once the readiness marker has been seen
    ready: bool,
}

impl WorkerProcess {
    /// Launch `command` through `sh -c` with piped stdin/stdout.
    ///
    /// stderr is inherited so engine diagnostics reach the service log.
    pub fn spawn(command: &str) -> Result<Self, BridgeError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true) // Ensure cleanup if the supervisor is dropped
            .spawn()
            .map_err(BridgeError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn(io::Error::other("worker stdin was not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn(io::Error::other("worker stdout was not captured")))?;

        let pid = child.id();
        info!(pid = ?pid, command = %command, "Worker process spawned");

        Ok(Self {
            child,
            stdin,
            stdout,
            pid,
            alive: true,
            ready: false,
        })
    }

    /// Read whatever is available, waiting at most `wait`.
    ///
    /// Dropping the pending read on timeout loses no data.
    pub async fn read_timeout(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<ReadEvent> {
        match tokio::time::timeout(wait, self.stdout.read(buf)).await {
            Err(_) => Ok(ReadEvent::Idle),
            Ok(Ok(0)) => {
                self.alive = false;
                Ok(ReadEvent::Eof)
            }
            Ok(Ok(n)) => Ok(ReadEvent::Bytes(n)),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Write a framed request and flush it.
    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => {
                self.alive = false;
                false
            }
        }
    }

    /// Describe how the process ended, if it has.
    pub fn exit_status(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            Ok(None) => "output closed".to_string(),
            Err(e) => format!("status unavailable: {e}"),
        }
    }

    /// Mark the process dead after a failed read or write.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Get the process ID of the worker (if still running).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) {
        self.alive = false;
        if let Err(e) = self.child.kill().await {
            // Already exited processes report InvalidInput on some platforms
            debug!(pid = ?self.pid, error = %e, "Kill returned an error");
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // kill_on_drop(true) reaps the child; this only records it
        if self.alive {
            warn!(pid = ?self.pid, "Dropping live worker process");
        } else {
            debug!(pid = ?self.pid, "Dropping worker process handle");
        }
    }
}
