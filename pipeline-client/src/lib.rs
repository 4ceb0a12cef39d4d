//! Pipeline Client - calls the front-end and extracts the result of interest
//!
//! An engine's raw output can carry banners or echoed input ahead of the
//! analysis itself. When a begin-marker is configured, [`PipelineClient::parse`]
//! returns the text from that marker onward and fails with a
//! [`FailureKind::ParseFailure`] tag when it is missing.
//!
//! ```ignore
//! let client = PipelineClient::new("http://127.0.0.1:8080").with_result_marker("<sentences>");
//! let xml = client.parse("今日はいい天気ですね。").await?;
//! ```

use pipeline_core::{AnnotateRequest, AnnotateResponse, ErrorBody, FailureKind};
use thiserror::Error;
use tracing::{debug, warn};

/// Front-end address used when `PIPELINE_URL` is unset
pub const DEFAULT_URL: &str = "http://127.0.0.1:8080";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Could not reach pipeline server at {url}: {source} (is pipeline-server running?)")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server reported {kind}: {message}")]
    Remote { kind: FailureKind, message: String },

    #[error("Result marker {marker:?} not found in engine output")]
    ParseFailure { marker: String },

    #[error("Unexpected response from server: {0}")]
    Decode(String),
}

impl ClientError {
    /// Failure tag for this error
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. } => FailureKind::ConnectionError,
            Self::Remote { kind, .. } => *kind,
            Self::ParseFailure { .. } | Self::Decode(_) => FailureKind::ParseFailure,
        }
    }
}

/// The part of `text` starting at `marker`.
pub fn extract_result<'a>(text: &'a str, marker: &str) -> Result<&'a str, ClientError> {
    pipeline_core::extract_from_marker(text, marker).ok_or_else(|| ClientError::ParseFailure {
        marker: marker.to_string(),
    })
}

/// HTTP client for one pipeline front-end
#[derive(Debug, Clone)]
pub struct PipelineClient {
    http: reqwest::Client,
    base_url: String,
    result_marker: Option<String>,
}

impl PipelineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            result_marker: None,
        }
    }

    /// Build from `PIPELINE_URL` and `PIPELINE_RESULT_MARKER`.
    pub fn from_env() -> Self {
        let url = std::env::var("PIPELINE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let client = Self::new(url);
        match std::env::var("PIPELINE_RESULT_MARKER") {
            Ok(marker) if !marker.is_empty() => client.with_result_marker(marker),
            _ => client,
        }
    }

    /// Extract results from this begin-marker onward
    pub fn with_result_marker(mut self, marker: impl Into<String>) -> Self {
        self.result_marker = Some(marker.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn connection_error(&self, source: reqwest::Error) -> ClientError {
        warn!(url = %self.base_url, error = %source, "Pipeline server unreachable");
        ClientError::Connection {
            url: self.base_url.clone(),
            source,
        }
    }

    /// Check that the server answers its health endpoint.
    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Decode(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    /// Send one annotation call and return the server's response unchanged.
    pub async fn annotate(&self, request: &AnnotateRequest) -> Result<AnnotateResponse, ClientError> {
        debug!(
            bytes = request.text.len(),
            engine = ?request.engine,
            properties = request.properties.len(),
            "Sending annotation call"
        );
        let response = self
            .http
            .post(self.url("/annotate"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.connection_error(e))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| ClientError::Decode(format!("invalid success body: {e}")));
        }

        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error) => Err(ClientError::Remote {
                kind: error.error.kind,
                message: error.error.message,
            }),
            Err(_) => Err(ClientError::Decode(format!(
                "status {status}: {}",
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    /// Annotate `text` on the default engine and extract the result.
    ///
    /// Without a configured marker the whole payload is returned.
    pub async fn parse(&self, text: &str) -> Result<String, ClientError> {
        let response = self.annotate(&AnnotateRequest::new(text)).await?;
        let payload = response.result.into_text();
        match self.result_marker.as_deref() {
            Some(marker) => extract_result(&payload, marker).map(str::to_string),
            None => Ok(payload),
        }
    }
}
