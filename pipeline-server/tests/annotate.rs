//! Integration tests for pipeline-server
//!
//! Drives the router in-process against `sh` stub engines.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use pipeline_core::{AnnotateRequest, AnnotateResponse, AnnotateResult, ErrorBody, FailureKind, OutputFormat};
use pipeline_server::{router, AppState, ServerConfig};
use tower::ServiceExt;
use worker_bridge::{TimeoutPolicy, WorkerConfig};

/// Echoes every document line back, then `END`
const ECHO_WORKER: &str = r#####"echo READY; while :; do while IFS= read -r line || exit 0; do [ "$line" = "####EOD####" ] && break; printf '%s\n' "$line"; done; echo END; done"#####;

/// Prints a banner before a fixed sentence list
const BANNER_WORKER: &str = r#####"echo READY; while :; do while IFS= read -r line || exit 0; do [ "$line" = "####EOD####" ] && break; done; echo 'Loading dictionary... done'; echo '<sentences>'; echo '<sentence id="s0"/>'; echo '</sentences>'; echo END; done"#####;

/// Exits once a full document has arrived
const EXITING_WORKER: &str = r#####"echo READY; while IFS= read -r line; do [ "$line" = "####EOD####" ] && exit 1; done"#####;

/// Consumes input and never answers
const SILENT_WORKER: &str = r#"echo READY; while IFS= read -r line; do :; done"#;

fn worker(command: &str) -> WorkerConfig {
    WorkerConfig::new(command)
        .with_ready_marker("READY")
        .with_startup_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(50))
        .with_drain_window(Duration::from_millis(30))
        .with_timeouts(TimeoutPolicy::new(
            Duration::from_millis(400),
            Duration::from_secs(3),
            10_000.0,
        ))
}

async fn app(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::start(&config).await.expect("engines start");
    (router(state.clone()), state)
}

async fn post_json(app: &Router, path: &str, body: &AnnotateRequest) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn get(app: &Router, path: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_annotate_echo() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("hello\nworld")).await;
    assert_eq!(status, StatusCode::OK);

    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert!(response.ok);
    assert_eq!(response.engine, "echo");
    assert!(!response.call_id.is_empty());
    assert_eq!(response.result, AnnotateResult::Text("hello\nworld".to_string()));

    state.shutdown().await;
}

#[tokio::test]
async fn test_annotate_lines_format() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let request = AnnotateRequest::new("a\nb\nc").with_format(OutputFormat::Lines);
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::OK);

    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        response.result,
        AnnotateResult::Lines(vec!["a".into(), "b".into(), "c".into()])
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_annotate_json_format() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let request = AnnotateRequest::new(r#"{"sentences": [{"id": "s0"}]}"#).with_format(OutputFormat::Json);
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::OK);
    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        response.result,
        AnnotateResult::Json(serde_json::json!({"sentences": [{"id": "s0"}]}))
    );

    let request = AnnotateRequest::new("<sentences/>").with_format(OutputFormat::Json);
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::ParseFailure);

    // Bad output does not cost the worker
    let (status, _) = post_json(&app, "/annotate", &AnnotateRequest::new("fine")).await;
    assert_eq!(status, StatusCode::OK);

    state.shutdown().await;
}

#[tokio::test]
async fn test_properties_forwarded_to_engine() {
    let config = ServerConfig::single("echo", worker(ECHO_WORKER).with_property_prefix("#prop "));
    let (app, state) = app(config).await;

    let request = AnnotateRequest::new("今日は晴れ")
        .with_property("annotators", "ssplit,kuromoji")
        .with_format(OutputFormat::Lines);
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::OK);
    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        response.result,
        AnnotateResult::Lines(vec![
            "#prop annotators=ssplit,kuromoji".into(),
            "今日は晴れ".into()
        ])
    );

    let request = AnnotateRequest::new("x").with_property("annotators", "ssplit\n####EOD####");
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::InvalidRequest);

    state.shutdown().await;
}

#[tokio::test]
async fn test_parse_plain_text_with_result_marker() {
    let config = ServerConfig::single(
        "banner",
        worker(BANNER_WORKER).with_result_marker("<sentences>"),
    );
    let (app, state) = app(config).await;

    let request = Request::builder()
        .method("POST")
        .uri("/parse")
        .body(Body::from("今日はいい天気ですね。"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        "<sentences>\n<sentence id=\"s0\"/>\n</sentences>"
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_missing_result_marker_is_parse_failure() {
    let config = ServerConfig::single("echo", worker(ECHO_WORKER).with_result_marker("<tokens>"));
    let (app, state) = app(config).await;

    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("no markup")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert!(!error.ok);
    assert!(error.call_id.is_some());
    assert_eq!(error.error.kind, FailureKind::ParseFailure);

    state.shutdown().await;
}

#[tokio::test]
async fn test_unknown_engine() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let request = AnnotateRequest::new("x").with_engine("knp");
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::UnknownEngine);

    state.shutdown().await;
}

#[tokio::test]
async fn test_sentinel_in_document_is_invalid_request() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let request = AnnotateRequest::new("before\n####EOD####\nafter");
    let (status, body) = post_json(&app, "/annotate", &request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::InvalidRequest);

    // The worker was never touched and still serves calls
    let (status, _) = post_json(&app, "/annotate", &AnnotateRequest::new("fine")).await;
    assert_eq!(status, StatusCode::OK);

    state.shutdown().await;
}

#[tokio::test]
async fn test_timeout_is_reported_and_worker_kept() {
    let (app, state) = app(ServerConfig::single("silent", worker(SILENT_WORKER))).await;

    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("hello")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::Timeout);

    let (status, _) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);

    state.shutdown().await;
}

#[tokio::test]
async fn test_exited_worker_is_refused() {
    let (app, state) = app(ServerConfig::single("exiting", worker(EXITING_WORKER))).await;

    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("bye")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::ProcessExited);

    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("again")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::ProcessExited);

    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let ready: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ready["status"], "degraded");
    assert_eq!(ready["engines"][0]["alive"], false);

    state.shutdown().await;
}

#[tokio::test]
async fn test_exited_worker_is_restarted_when_enabled() {
    let config = ServerConfig::single("exiting", worker(EXITING_WORKER).with_restart_on_exit(true));
    let (app, state) = app(config).await;

    let (status, _) = post_json(&app, "/annotate", &AnnotateRequest::new("bye")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // Restarted before the call; this stub exits again, but only after the
    // document was delivered to a fresh process.
    let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new("again")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error.kind, FailureKind::ProcessExited);
    assert!(!error.error.message.contains("no running worker"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_are_serialised() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let calls = (0..8).map(|i| {
        let app = app.clone();
        async move {
            let text = format!("document {i}\nsecond line of {i}");
            let (status, body) = post_json(&app, "/annotate", &AnnotateRequest::new(text.clone())).await;
            (text, status, body)
        }
    });
    let results = futures_util::future::join_all(calls).await;

    for (text, status, body) in results {
        assert_eq!(status, StatusCode::OK);
        let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.result, AnnotateResult::Text(text));
    }

    let statuses = state.statuses();
    assert_eq!(statuses[0].calls_served, Some(8));

    state.shutdown().await;
}

#[tokio::test]
async fn test_multiple_engines() {
    let mut config = ServerConfig::single("echo", worker(ECHO_WORKER));
    config.engines.insert(
        "banner".to_string(),
        worker(BANNER_WORKER).with_result_marker("<sentences>"),
    );
    let (app, state) = app(config).await;

    let (_, body) = post_json(&app, "/annotate", &AnnotateRequest::new("plain")).await;
    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.engine, "echo");
    assert_eq!(response.result, AnnotateResult::Text("plain".to_string()));

    let (_, body) = post_json(&app, "/annotate", &AnnotateRequest::new("plain").with_engine("banner")).await;
    let response: AnnotateResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.engine, "banner");
    assert!(response.result.into_text().starts_with("<sentences>"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_health_and_ready() {
    let (app, state) = app(ServerConfig::single("echo", worker(ECHO_WORKER))).await;

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    let ready: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["default_engine"], "echo");
    assert_eq!(ready["engines"][0]["name"], "echo");
    assert_eq!(ready["engines"][0]["state"], "idle");

    let (status, _) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    state.shutdown().await;
}
