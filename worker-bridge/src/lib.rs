//! Worker Bridge - stdio bridge to external analysis engines
//!
//! This crate provides a `Supervisor` that owns one long-lived worker process
//! (a tokenizer, parser or similar engine written in any language) and turns
//! "analyse this document" into "here is the payload, or here is why not".
//!
//! # Architecture
//!
//! The engine is kept running between calls so that its models are loaded
//! once. Documents travel over the worker's stdin and results come back over
//! its stdout, framed by literal sentinel lines:
//! - Request: document lines, then the request sentinel line (`####EOD####`)
//! - Response: result lines, then the response sentinel line (`END`)
//!
//! There is no length prefix, so the supervisor polls the output stream with
//! short bounded reads and scans for the response sentinel. Each call has a
//! deadline that grows with the document size, so a hung worker surfaces as
//! [`CallError::Timeout`] and a crashed one as [`CallError::ProcessExited`].
//!
//! # Example
//!
//! ```ignore
//! use worker_bridge::{Request, Supervisor, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WorkerConfig::new("python3 udpipe.py model.udpipe all");
//!     let mut supervisor = Supervisor::new("udpipe", config)?;
//!     supervisor.start().await?;
//!
//!     let payload = supervisor.submit(&Request::from_text("Hello world.")).await?;
//!     println!("{payload}");
//!
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod workers;

// Re-export main types for convenience
pub use codec::{Request, ResponsePayload, SentinelMatch};
pub use config::{TimeoutPolicy, WorkerConfig};
pub use error::{BridgeError, CallError, CallOutcome};
pub use workers::{Supervisor, SupervisorState, WorkerProcess};
