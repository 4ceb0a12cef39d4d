//! Supervisor driving one worker process.
//!
//! # Call cycle
//!
//! `Idle → Sending → AwaitingResponse → Draining → Idle`
//!
//! 1. Pre-drain: discard output left over from an earlier call until the
//!    stream stays quiet for `drain_window`.
//! 2. Send the framed document.
//! 3. Poll the output with bounded reads until the response sentinel line
//!    appears, the stream closes, or the size-scaled deadline passes.
//! 4. Cut the buffer at the sentinel and decode the payload.
//!
//! The deadline is fixed before the pre-drain, so every step of a call,
//! pre-drain included, fits inside `min(max, base + bytes / bytes_per_second)`.
//! The pre-drain may use at most a quarter of it.
//!
//! A timed-out worker is kept for the next call; its late output is removed
//! by the next pre-drain. If the deadline passed while the document was being
//! written, the worker may hold a partial document that the next one is
//! appended to. A worker whose output closed is torn down and stays down until
//! [`Supervisor::restart`] or [`Supervisor::start`].

use pipeline_core::FailureKind;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Request, ResponsePayload};
use crate::config::WorkerConfig;
use crate::error::{BridgeError, CallError, CallOutcome};
use crate::workers::process::{ReadEvent, WorkerProcess};

/// Share of the call deadline the pre-drain may spend (one part in N)
const PRE_DRAIN_SHARE: u32 = 4;

/// Where the supervisor is in its call cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Ready for the next call
    Idle,
    /// Pre-draining stale output and writing the request
    Sending,
    /// Polling for the response sentinel
    AwaitingResponse,
    /// Sentinel seen; cutting and decoding the payload
    Draining,
    /// The last call failed
    Failed(FailureKind),
    /// No worker process
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Sending => f.write_str("sending"),
            Self::AwaitingResponse => f.write_str("awaiting_response"),
            Self::Draining => f.write_str("draining"),
            Self::Failed(kind) => write!(f, "failed({kind})"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Owns one engine process and every byte exchanged with it
pub struct Supervisor {
    /// Engine name used in logs
    name: String,
    config: WorkerConfig,
    process: Option<WorkerProcess>,
    state: SupervisorState,
    calls_served: u64,
    restarts: u64,
}

impl Supervisor {
    /// Create a supervisor; no process is launched until [`Supervisor::start`].
    pub fn new(name: impl Into<String>, config: WorkerConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            process: None,
            state: SupervisorState::Stopped,
            calls_served: 0,
            restarts: 0,
        })
    }

    /// Launch the worker and wait for its readiness marker.
    ///
    /// Does nothing if a live worker is already attached.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        if self.is_alive() {
            debug!(engine = %self.name, "Worker already running");
            return Ok(());
        }
        // Reap any dead process before replacing it
        self.stop().await;

        info!(engine = %self.name, command = %self.config.command, "Starting worker");
        let mut process = WorkerProcess::spawn(&self.config.command)?;

        if let Err(e) = self.await_ready(&mut process).await {
            error!(engine = %self.name, error = %e, "Worker failed to start");
            process.kill().await;
            return Err(e);
        }

        info!(engine = %self.name, pid = ?process.pid(), "Worker ready");
        self.process = Some(process);
        self.state = SupervisorState::Idle;
        Ok(())
    }

    /// Block until the readiness marker appears on the worker's output.
    async fn await_ready(&self, process: &mut WorkerProcess) -> Result<(), BridgeError> {
        let Some(marker) = self.config.ready_marker.as_deref() else {
            process.mark_ready();
            return Ok(());
        };

        let started = Instant::now();
        let deadline = started + self.config.startup_timeout;
        let mut seen = Vec::new();
        let mut chunk = vec![0u8; self.config.read_chunk];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Startup {
                    marker: marker.to_string(),
                    waited: now - started,
                });
            }
            let wait = self.config.poll_interval.min(deadline - now);

            match process.read_timeout(&mut chunk, wait).await {
                Ok(ReadEvent::Bytes(n)) => {
                    seen.extend_from_slice(&chunk[..n]);
                    if codec::contains_marker(&seen, marker) {
                        process.mark_ready();
                        debug!(
                            engine = %self.name,
                            elapsed_ms = started.elapsed().as_millis(),
                            "Readiness marker seen"
                        );
                        return Ok(());
                    }
                    // Only a partial marker at the tail can still matter
                    let keep = marker.len().saturating_sub(1);
                    if seen.len() > keep {
                        seen.drain(..seen.len() - keep);
                    }
                }
                Ok(ReadEvent::Idle) => {}
                Ok(ReadEvent::Eof) => {
                    return Err(BridgeError::StartupExited {
                        status: process.exit_status(),
                    })
                }
                Err(e) => return Err(BridgeError::StartupIo(e)),
            }
        }
    }

    /// Send one document and wait for its payload.
    ///
    /// Never blocks past the deadline computed from the document size. Calls
    /// on one supervisor are sequential by construction (`&mut self`).
    pub async fn submit(&mut self, request: &Request) -> CallOutcome {
        if let Some(index) = codec::sentinel_collision(request.lines(), &self.config.request_sentinel) {
            return Err(CallError::SentinelInDocument {
                line: index + 1,
                sentinel: self.config.request_sentinel.clone(),
            });
        }
        if request.byte_len() > self.config.max_request_bytes {
            return Err(CallError::RequestTooLarge {
                size: request.byte_len(),
                limit: self.config.max_request_bytes,
            });
        }
        if codec::sentinel_collision(request.lines(), &self.config.response_sentinel).is_some() {
            warn!(
                engine = %self.name,
                sentinel = %self.config.response_sentinel,
                "Document contains the response sentinel; an echoing engine will end its response early"
            );
        }

        let Some(process) = self.process.as_mut() else {
            return Err(CallError::ProcessExited {
                status: "worker is not running".to_string(),
            });
        };

        let outcome = exchange(&self.name, &self.config, process, &mut self.state, request).await;

        match &outcome {
            Ok(payload) => {
                self.calls_served += 1;
                self.state = SupervisorState::Idle;
                debug!(engine = %self.name, bytes = payload.len(), "Call complete");
            }
            Err(e) => {
                self.state = SupervisorState::Failed(e.kind());
                if e.is_fatal() {
                    error!(engine = %self.name, error = %e, "Worker exited; tearing down");
                    if let Some(mut dead) = self.process.take() {
                        dead.kill().await;
                    }
                } else {
                    warn!(engine = %self.name, error = %e, "Call failed; keeping worker");
                }
            }
        }
        outcome
    }

    /// Convenience wrapper splitting `text` into lines.
    pub async fn submit_text(&mut self, text: &str) -> CallOutcome {
        self.submit(&Request::from_text(text)).await
    }

    /// Terminate the worker and release its handles; safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            info!(engine = %self.name, pid = ?process.pid(), "Stopping worker");
            process.kill().await;
        }
        self.state = SupervisorState::Stopped;
    }

    /// Stop and relaunch the worker.
    pub async fn restart(&mut self) -> Result<(), BridgeError> {
        self.stop().await;
        self.restarts += 1;
        info!(engine = %self.name, restarts = self.restarts, "Restarting worker");
        self.start().await
    }

    /// Check if the worker process is attached and running.
    pub fn is_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(WorkerProcess::is_alive)
    }

    pub fn is_ready(&self) -> bool {
        self.process.as_ref().is_some_and(WorkerProcess::is_ready)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(WorkerProcess::pid)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn calls_served(&self) -> u64 {
        self.calls_served
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}

/// One full request/response cycle against a live worker.
async fn exchange(
    name: &str,
    config: &WorkerConfig,
    process: &mut WorkerProcess,
    state: &mut SupervisorState,
    request: &Request,
) -> CallOutcome {
    *state = SupervisorState::Sending;

    let wait = config.timeouts.wait_for(request.byte_len());
    let started = Instant::now();
    let deadline = started + wait;

    let discarded = pre_drain(config, process, started + wait / PRE_DRAIN_SHARE).await?;
    if discarded > 0 {
        debug!(engine = %name, bytes = discarded, "Discarded stale worker output");
    }

    let framed = codec::encode_request(request.lines(), &config.request_sentinel);

    match tokio::time::timeout_at(deadline, process.write_all(&framed)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            process.mark_dead();
            return Err(CallError::ProcessExited {
                status: format!("write failed: {e}; {}", process.exit_status()),
            });
        }
        Err(_) => {
            warn!(
                engine = %name,
                bytes = framed.len(),
                "Deadline passed while writing; worker may hold a partial document"
            );
            return Err(CallError::Timeout { waited: wait });
        }
    }
    debug!(engine = %name, bytes = framed.len(), wait_ms = wait.as_millis(), "Request sent");

    *state = SupervisorState::AwaitingResponse;
    let sentinel = config.response_sentinel.as_str();
    let mode = config.sentinel_match;
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; config.read_chunk];

    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(
                engine = %name,
                partial_bytes = buffer.len(),
                "Timed out waiting for response sentinel"
            );
            return Err(CallError::Timeout { waited: wait });
        }

        match process.read_timeout(&mut chunk, config.poll_interval.min(deadline - now)).await {
            Ok(ReadEvent::Bytes(n)) => {
                let scan_from = buffer.len().saturating_sub(sentinel.len() + 2);
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(end) = mode.find_end(&buffer, sentinel, scan_from) {
                    *state = SupervisorState::Draining;
                    let trailing = buffer.len() - mode.consumed(&buffer, end, sentinel);
                    if trailing > 0 {
                        debug!(engine = %name, bytes = trailing, "Dropping output after sentinel");
                    }
                    return decode_payload(codec::extract_payload(&buffer, end));
                }
            }
            Ok(ReadEvent::Idle) => {}
            Ok(ReadEvent::Eof) => {
                return Err(CallError::ProcessExited {
                    status: process.exit_status(),
                })
            }
            Err(e) => {
                process.mark_dead();
                return Err(CallError::ProcessExited {
                    status: format!("read failed: {e}"),
                });
            }
        }
    }
}

/// Discard output already buffered on the worker's stdout.
///
/// Stops at the first quiet `drain_window`, or at `give_up` if the worker
/// never goes quiet.
async fn pre_drain(
    config: &WorkerConfig,
    process: &mut WorkerProcess,
    give_up: Instant,
) -> Result<usize, CallError> {
    let mut scratch = vec![0u8; config.read_chunk];
    let mut discarded = 0;

    loop {
        let now = Instant::now();
        if now >= give_up {
            break;
        }
        match process
            .read_timeout(&mut scratch, config.drain_window.min(give_up - now))
            .await
        {
            Ok(ReadEvent::Bytes(n)) => discarded += n,
            Ok(ReadEvent::Idle) => return Ok(discarded),
            Ok(ReadEvent::Eof) => {
                return Err(CallError::ProcessExited {
                    status: process.exit_status(),
                })
            }
            Err(e) => {
                process.mark_dead();
                return Err(CallError::ProcessExited {
                    status: format!("read failed: {e}"),
                });
            }
        }
    }
    warn!(bytes = discarded, "Worker output never went quiet; sending anyway");
    Ok(discarded)
}

fn decode_payload(bytes: &[u8]) -> CallOutcome {
    String::from_utf8(bytes.to_vec())
        .map(ResponsePayload::new)
        .map_err(|e| CallError::ParseFailure(format!("worker output is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            Supervisor::new("bad", WorkerConfig::default()),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_without_start_is_process_exited() {
        let mut supervisor = Supervisor::new("idle", WorkerConfig::new("cat")).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!supervisor.is_alive());

        let err = supervisor.submit_text("hello").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProcessExited);
    }

    #[tokio::test]
    async fn test_sentinel_in_document_is_rejected_before_sending() {
        let mut supervisor = Supervisor::new("idle", WorkerConfig::new("cat")).unwrap();
        let err = supervisor
            .submit_text("first\n####EOD####\nsecond")
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SentinelInDocument { line: 2, .. }));
        assert_eq!(err.kind(), FailureKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_oversized_document_is_rejected() {
        let config = WorkerConfig::new("cat").with_max_request_bytes(4);
        let mut supervisor = Supervisor::new("idle", config).unwrap();
        let err = supervisor.submit_text("too long").await.unwrap_err();
        assert!(matches!(err, CallError::RequestTooLarge { size: 8, limit: 4 }));
    }

    #[test]
    fn test_decode_payload_rejects_invalid_utf8() {
        let err = decode_payload(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ParseFailure);
        assert_eq!(decode_payload("今日".as_bytes()).unwrap(), "今日");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::Idle.to_string(), "idle");
        assert_eq!(
            SupervisorState::Failed(FailureKind::Timeout).to_string(),
            "failed(timeout)"
        );
    }
}
