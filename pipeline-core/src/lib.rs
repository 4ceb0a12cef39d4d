//! Pipeline Core Library
//!
//! Provides utilities shared by the pipeline services and clients:
//! - RPC wire types for annotation calls
//! - Failure kind tags carried across the RPC boundary
//! - Result extraction from raw engine output
//! - Tracing initialisation

pub mod api;
pub mod extract;

// Re-export commonly used items
pub use api::{
    AnnotateRequest, AnnotateResponse, AnnotateResult, ErrorBody, ErrorDetail, FailureKind,
    OutputFormat,
};
pub use extract::extract_from_marker;

/// Initialize tracing with standard configuration
pub fn init_tracing(service_name: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{service_name}=info,worker_bridge=info,tower_http=debug"
        ))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Initialize tracing with JSON output (for production)
pub fn init_tracing_json(service_name: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{service_name}=info,worker_bridge=info,tower_http=info"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

/// Initialize tracing on stderr, for tools whose stdout carries results
pub fn init_tracing_stderr(service_name: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{service_name}=warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Pick the formatter from `PIPELINE_LOG_JSON`.
pub fn init_tracing_from_env(service_name: &str) {
    if json_logging_requested(std::env::var("PIPELINE_LOG_JSON").ok().as_deref()) {
        init_tracing_json(service_name);
    } else {
        init_tracing(service_name);
    }
}

fn json_logging_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes")
    )
}
