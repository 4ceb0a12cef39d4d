//! RPC wire types shared by `pipeline-server` and `pipeline-client`.
//!
//! One call carries one document and returns either a result payload or a
//! tagged failure. Failures are never raw transport errors: the `kind` tag is
//! what callers branch on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Representation requested for a successful result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The worker payload as a single string
    #[default]
    Text,
    /// The worker payload split into lines
    Lines,
    /// The worker payload parsed as a JSON document
    Json,
}

/// Inbound annotation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateRequest {
    /// Document body
    pub text: String,

    /// Engine to route to; the server's default engine when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Opaque engine options (e.g. `annotators`), passed on to engines that take them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl AnnotateRequest {
    /// Create a request for the default engine with text output
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            engine: None,
            output_format: OutputFormat::default(),
            properties: BTreeMap::new(),
        }
    }

    /// Route the request to a named engine
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Select the output representation
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Add one engine property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Result payload in the requested representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotateResult {
    Text(String),
    Lines(Vec<String>),
    Json(serde_json::Value),
}

impl AnnotateResult {
    /// Render a payload in the given format; fails only for JSON that does not parse
    pub fn render(payload: &str, format: OutputFormat) -> Result<Self, serde_json::Error> {
        Ok(match format {
            OutputFormat::Text => Self::Text(payload.to_string()),
            OutputFormat::Lines => Self::Lines(payload.lines().map(str::to_string).collect()),
            OutputFormat::Json => Self::Json(serde_json::from_str(payload)?),
        })
    }

    /// Flatten back to text, joining lines with `\n`
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Lines(lines) => lines.join("\n"),
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Successful annotation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateResponse {
    pub ok: bool,
    pub call_id: String,
    pub engine: String,
    pub result: AnnotateResult,
}

/// Failure kinds visible to RPC callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Response sentinel not seen before the size-scaled deadline
    Timeout,
    /// Worker output closed before the sentinel; worker is unusable
    ProcessExited,
    /// Payload could not be decoded or lacked the expected begin-marker
    ParseFailure,
    /// The service could not be reached at all
    ConnectionError,
    /// The document cannot be framed (e.g. it contains the request sentinel)
    InvalidRequest,
    /// No engine registered under the requested name
    UnknownEngine,
}

impl FailureKind {
    /// Stable label used in logs and metrics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProcessExited => "process_exited",
            Self::ParseFailure => "parse_failure",
            Self::ConnectionError => "connection_error",
            Self::InvalidRequest => "invalid_request",
            Self::UnknownEngine => "unknown_engine",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Body returned with every failed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub error: ErrorDetail,
}

impl ErrorBody {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            call_id: None,
            error: ErrorDetail {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}
