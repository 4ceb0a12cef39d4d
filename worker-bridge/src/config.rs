//! Supervisor configuration.
//!
//! Everything a supervisor needs is supplied at construction time. Durations
//! are expressed in milliseconds when (de)serialized, e.g. in an engines file:
//!
//! ```json
//! {
//!   "command": "python3 depccg.py src model 1 en",
//!   "ready_marker": null,
//!   "timeouts": { "base_ms": 3000, "max_ms": 40000, "bytes_per_second": 20.0 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::{SentinelMatch, DEFAULT_REQUEST_SENTINEL, DEFAULT_RESPONSE_SENTINEL};
use crate::error::BridgeError;

/// Maximum time to wait for the readiness marker after launch (in milliseconds).
/// Engines load their models before printing the marker, which can be slow.
const WORKER_STARTUP_TIMEOUT_MS: u64 = 500_000;

/// Upper bound on a single bounded read of the worker's output (in milliseconds)
const POLL_INTERVAL_MS: u64 = 1_000;

/// Quiet period that ends the pre-drain of stale output (in milliseconds)
const DRAIN_WINDOW_MS: u64 = 300;

/// Bytes requested from the worker's stdout per read
const READ_CHUNK_BYTES: usize = 4_000;

/// Largest document accepted for one call
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Size-scaled deadline for one call:
/// `min(max, base + byte_len / bytes_per_second)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    #[serde(rename = "base_ms", with = "duration_ms")]
    pub base: Duration,

    #[serde(rename = "max_ms", with = "duration_ms")]
    pub max: Duration,

    /// Input bytes the engine is expected to get through per second
    pub bytes_per_second: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(40),
            bytes_per_second: 20.0,
        }
    }
}

impl TimeoutPolicy {
    pub fn new(base: Duration, max: Duration, bytes_per_second: f64) -> Self {
        Self {
            base,
            max,
            bytes_per_second,
        }
    }

    /// How long a request of `byte_len` bytes may take.
    pub fn wait_for(&self, byte_len: usize) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = Duration::try_from_secs_f64(byte_len as f64 / self.bytes_per_second)
            .unwrap_or(self.max);
        self.base.saturating_add(scaled).min(self.max)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.bytes_per_second.is_finite() || self.bytes_per_second <= 0.0 {
            return Err(format!(
                "bytes_per_second must be positive, got {}",
                self.bytes_per_second
            ));
        }
        if self.base > self.max {
            return Err(format!(
                "base wait {:?} exceeds max wait {:?}",
                self.base, self.max
            ));
        }
        Ok(())
    }
}

/// Configuration for one supervised worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Shell command launching the engine (run through `sh -c`)
    pub command: String,

    /// Text the engine prints once it is ready; `None` means ready on spawn
    pub ready_marker: Option<String>,

    /// Line terminating a request on the worker's stdin
    pub request_sentinel: String,

    /// Line terminating a response on the worker's stdout
    pub response_sentinel: String,

    /// `prompt` for engines that end a response with an unterminated prompt
    pub sentinel_match: SentinelMatch,

    #[serde(rename = "startup_timeout_ms", with = "duration_ms")]
    pub startup_timeout: Duration,

    pub timeouts: TimeoutPolicy,

    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    #[serde(rename = "drain_window_ms", with = "duration_ms")]
    pub drain_window: Duration,

    pub read_chunk: usize,

    pub max_request_bytes: usize,

    /// Relaunch a worker that exited instead of refusing further calls
    pub restart_on_exit: bool,

    /// Begin-marker the front-end looks for in the payload
    pub result_marker: Option<String>,

    /// Prefix for `key=value` property lines sent ahead of the document;
    /// `None` means the engine takes no properties
    pub property_prefix: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            ready_marker: None,
            request_sentinel: DEFAULT_REQUEST_SENTINEL.to_string(),
            response_sentinel: DEFAULT_RESPONSE_SENTINEL.to_string(),
            sentinel_match: SentinelMatch::Line,
            startup_timeout: Duration::from_millis(WORKER_STARTUP_TIMEOUT_MS),
            timeouts: TimeoutPolicy::default(),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            drain_window: Duration::from_millis(DRAIN_WINDOW_MS),
            read_chunk: READ_CHUNK_BYTES,
            max_request_bytes: MAX_REQUEST_BYTES,
            restart_on_exit: false,
            result_marker: None,
            property_prefix: None,
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with default sentinels and timeouts
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = Some(marker.into());
        self
    }

    pub fn with_sentinels(mut self, request: impl Into<String>, response: impl Into<String>) -> Self {
        self.request_sentinel = request.into();
        self.response_sentinel = response.into();
        self
    }

    pub fn with_sentinel_match(mut self, mode: SentinelMatch) -> Self {
        self.sentinel_match = mode;
        self
    }

    pub fn with_property_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.property_prefix = Some(prefix.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }

    pub fn with_restart_on_exit(mut self, restart: bool) -> Self {
        self.restart_on_exit = restart;
        self
    }

    pub fn with_result_marker(mut self, marker: impl Into<String>) -> Self {
        self.result_marker = Some(marker.into());
        self
    }

    /// Reject configurations the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let invalid = |msg: String| Err(BridgeError::InvalidConfig(msg));

        if self.command.trim().is_empty() {
            return invalid("launch command is empty".to_string());
        }
        for (name, sentinel) in [
            ("request_sentinel", &self.request_sentinel),
            ("response_sentinel", &self.response_sentinel),
        ] {
            if sentinel.is_empty() {
                return invalid(format!("{name} is empty"));
            }
            if sentinel.contains(['\n', '\r']) {
                return invalid(format!("{name} must be a single line"));
            }
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be non-zero".to_string());
        }
        if self.read_chunk == 0 {
            return invalid("read_chunk must be non-zero".to_string());
        }
        self.timeouts.validate().map_err(BridgeError::InvalidConfig)
    }
}

/// `Duration` as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
