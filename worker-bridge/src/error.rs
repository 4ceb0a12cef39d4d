//! Error taxonomy for worker lifecycle and calls.

use pipeline_core::FailureKind;
use std::time::Duration;
use thiserror::Error;

use crate::codec::ResponsePayload;

/// Errors raised while launching or managing a worker process
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker did not print readiness marker {marker:?} within {waited:?}")]
    Startup { marker: String, waited: Duration },

    #[error("Worker exited before becoming ready ({status})")]
    StartupExited { status: String },

    #[error("Failed to read worker output during startup: {0}")]
    StartupIo(#[source] std::io::Error),

    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single request/response cycle
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Worker did not finish its response within {waited:?}")]
    Timeout { waited: Duration },

    #[error("Worker process exited ({status})")]
    ProcessExited { status: String },

    #[error("Failed to parse worker response: {0}")]
    ParseFailure(String),

    #[error("Document line {line} equals the request sentinel {sentinel:?}")]
    SentinelInDocument { line: usize, sentinel: String },

    #[error("Document of {size} bytes exceeds the {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },
}

impl CallError {
    /// Tag surfaced to RPC callers
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::ProcessExited { .. } => FailureKind::ProcessExited,
            Self::ParseFailure(_) => FailureKind::ParseFailure,
            Self::SentinelInDocument { .. } | Self::RequestTooLarge { .. } => {
                FailureKind::InvalidRequest
            }
        }
    }

    /// Whether the worker can no longer serve calls after this failure
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProcessExited { .. })
    }
}

/// Result of one `submit`: the payload, or why there is none
pub type CallOutcome = Result<ResponsePayload, CallError>;
