//! HTTP handlers for the annotation RPC.
//!
//! Endpoints:
//! - POST /annotate - JSON call with engine and output format selection
//! - POST /parse - plain-text document in, plain-text result out (default engine)
//! - GET /health - Health check
//! - GET /ready - Per-engine worker status
//! - GET /metrics - Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pipeline_core::{
    AnnotateRequest, AnnotateResponse, AnnotateResult, ErrorBody, ErrorDetail, FailureKind,
    OutputFormat,
};
use std::collections::BTreeMap;
use tracing::{info, info_span, warn, Instrument};

use crate::state::AppState;

/// HTTP status carrying each failure kind
pub const fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::ProcessExited | FailureKind::ConnectionError => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::ParseFailure => StatusCode::BAD_GATEWAY,
        FailureKind::InvalidRequest => StatusCode::BAD_REQUEST,
        FailureKind::UnknownEngine => StatusCode::NOT_FOUND,
    }
}

fn error_response(call_id: &str, detail: ErrorDetail) -> Response {
    let status = status_for(detail.kind);
    let body = ErrorBody::new(detail.kind, detail.message).with_call_id(call_id);
    (status, Json(body)).into_response()
}

fn new_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Route one document to an engine and shape its result.
async fn run_call(
    state: &AppState,
    call_id: &str,
    engine: Option<&str>,
    text: &str,
    properties: &BTreeMap<String, String>,
    format: OutputFormat,
) -> Result<(String, AnnotateResult), ErrorDetail> {
    let Some(handle) = state.engine(engine) else {
        let name = engine.unwrap_or_default();
        warn!(engine = %name, "Call for unknown engine");
        return Err(ErrorDetail {
            kind: FailureKind::UnknownEngine,
            message: format!("no engine named {name:?}"),
        });
    };

    let span = info_span!(
        "call",
        call_id = %call_id,
        engine = %handle.name,
        bytes = text.len(),
        properties = properties.len()
    );
    async {
        info!("Call received");
        let outcome = handle.annotate(text, properties).await.and_then(|payload| {
            AnnotateResult::render(&payload, format)
                .map(|result| (payload.len(), result))
                .map_err(|e| ErrorDetail {
                    kind: FailureKind::ParseFailure,
                    message: format!("engine output is not valid JSON: {e}"),
                })
        });
        match outcome {
            Ok((bytes, result)) => {
                info!(result_bytes = bytes, "Call succeeded");
                Ok((handle.name.clone(), result))
            }
            Err(detail) => {
                warn!(kind = %detail.kind, error = %detail.message, "Call failed");
                Err(detail)
            }
        }
    }
    .instrument(span)
    .await
}

/// Annotate a document: POST /annotate
pub async fn annotate_handler(
    State(state): State<AppState>,
    Json(req): Json<AnnotateRequest>,
) -> Response {
    let call_id = new_call_id();
    let outcome = run_call(
        &state,
        &call_id,
        req.engine.as_deref(),
        &req.text,
        &req.properties,
        req.output_format,
    )
    .await;
    match outcome {
        Ok((engine, result)) => Json(AnnotateResponse {
            ok: true,
            call_id,
            engine,
            result,
        })
        .into_response(),
        Err(detail) => error_response(&call_id, detail),
    }
}

/// Parse a plain-text document on the default engine: POST /parse
pub async fn parse_handler(State(state): State<AppState>, body: String) -> Response {
    let call_id = new_call_id();
    match run_call(&state, &call_id, None, &body, &BTreeMap::new(), OutputFormat::Text).await {
        Ok((_, result)) => result.into_text().into_response(),
        Err(detail) => error_response(&call_id, detail),
    }
}

/// Health check
pub async fn health_handler() -> &'static str {
    "OK"
}

/// Readiness check (includes worker status per engine)
pub async fn ready_handler(State(state): State<AppState>) -> Response {
    let engines = state.statuses();
    let all_alive = engines.iter().all(|e| e.alive != Some(false));
    let status = if all_alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "ok": all_alive,
        "status": if all_alive { "ready" } else { "degraded" },
        "default_engine": state.default_engine(),
        "uptime_secs": state.uptime_secs(),
        "engines": engines,
    });
    (status, Json(body)).into_response()
}
