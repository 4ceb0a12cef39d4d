//! Shared application state for the RPC front-end.
//!
//! Each engine owns one supervisor behind an async mutex. The mutex is the
//! critical section: a call holds it for one whole `submit`, so the worker
//! never sees two documents at once and callers are served in arrival order.

use pipeline_core::{ErrorDetail, FailureKind};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};
use worker_bridge::{BridgeError, Request, ResponsePayload, Supervisor};

use crate::config::ServerConfig;

/// One engine: its supervisor plus the front-end's per-engine settings
pub struct EngineHandle {
    pub name: String,

    /// Exclusive access to the worker for the length of one call
    supervisor: Mutex<Supervisor>,

    /// Begin-marker the result must contain
    result_marker: Option<String>,

    /// Prefix for property lines; `None` when the engine takes no properties
    property_prefix: Option<String>,

    restart_on_exit: bool,

    /// Calls waiting for the supervisor lock
    waiting: AtomicUsize,
}

/// Point-in-time view of an engine for readiness reporting
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub name: String,
    /// `None` while a call holds the worker
    pub alive: Option<bool>,
    pub state: String,
    pub pid: Option<u32>,
    pub calls_served: Option<u64>,
    pub waiting: usize,
}

impl EngineHandle {
    pub fn new(name: impl Into<String>, supervisor: Supervisor) -> Self {
        let result_marker = supervisor.config().result_marker.clone();
        let property_prefix = supervisor.config().property_prefix.clone();
        let restart_on_exit = supervisor.config().restart_on_exit;
        Self {
            name: name.into(),
            supervisor: Mutex::new(supervisor),
            result_marker,
            property_prefix,
            restart_on_exit,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run one document through the engine.
    ///
    /// The call itself runs on its own task: once queued it completes even if
    /// the caller goes away, so the worker never sees half a document.
    /// Every failure comes back as a tagged [`ErrorDetail`].
    pub async fn annotate(
        self: &Arc<Self>,
        text: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, ErrorDetail> {
        let request = self.build_request(text, properties)?;
        crate::metrics::record_request_bytes(&self.name, request.byte_len());

        let handle = Arc::clone(self);
        let payload = tokio::spawn(async move { handle.call(&request).await })
            .await
            .map_err(|e| failure(FailureKind::ProcessExited, format!("call task failed: {e}")))??;

        match self.result_marker.as_deref() {
            None => Ok(payload.into_string()),
            Some(marker) => pipeline_core::extract_from_marker(payload.as_str(), marker)
                .map(str::to_string)
                .ok_or_else(|| {
                    failure(
                        FailureKind::ParseFailure,
                        format!("result marker {marker:?} not found in worker output"),
                    )
                }),
        }
    }

    /// Frame the document, with property lines ahead of it when the engine takes them.
    fn build_request(
        &self,
        text: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<Request, ErrorDetail> {
        if properties.is_empty() {
            return Ok(Request::from_text(text));
        }
        let Some(prefix) = self.property_prefix.as_deref() else {
            warn!(
                engine = %self.name,
                keys = ?properties.keys().collect::<Vec<_>>(),
                "Engine takes no properties; ignoring them"
            );
            return Ok(Request::from_text(text));
        };

        if let Some((key, _)) = properties
            .iter()
            .find(|(k, v)| k.contains(['\n', '\r', '=']) || v.contains(['\n', '\r']))
        {
            return Err(failure(
                FailureKind::InvalidRequest,
                format!("property {key:?} cannot be sent on one line"),
            ));
        }

        let header = properties.iter().map(|(k, v)| format!("{prefix}{k}={v}"));
        Ok(Request::from_lines(header.chain(text.lines().map(str::to_string))))
    }

    /// Queue for the worker, then submit.
    async fn call(&self, request: &Request) -> Result<ResponsePayload, ErrorDetail> {
        let mut supervisor = {
            let _waiting = WaitingGuard::enter(&self.name, &self.waiting);
            self.supervisor.lock().await
        };

        if !supervisor.is_alive() {
            if !self.restart_on_exit {
                return Err(failure(
                    FailureKind::ProcessExited,
                    format!("engine {} has no running worker", self.name),
                ));
            }
            warn!(engine = %self.name, "Worker is down; restarting before call");
            crate::metrics::record_restart(&self.name);
            if let Err(e) = supervisor.restart().await {
                crate::metrics::set_worker_alive(&self.name, false);
                return Err(failure(
                    FailureKind::ProcessExited,
                    format!("worker restart failed: {e}"),
                ));
            }
        }

        let started = Instant::now();
        let outcome = supervisor.submit(request).await;
        let alive = supervisor.is_alive();
        drop(supervisor);

        let label = outcome.as_ref().map_or_else(|e| e.kind().as_str(), |_| "success");
        crate::metrics::record_call(&self.name, label, started.elapsed());
        crate::metrics::set_worker_alive(&self.name, alive);

        outcome.map_err(|e| failure(e.kind(), e.to_string()))
    }

    /// Calls currently queued for the worker
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Snapshot without waiting behind an in-flight call.
    pub fn status(&self) -> EngineStatus {
        let waiting = self.waiting();
        match self.supervisor.try_lock() {
            Ok(mut supervisor) => EngineStatus {
                name: self.name.clone(),
                alive: Some(supervisor.is_alive()),
                state: supervisor.state().to_string(),
                pid: supervisor.pid(),
                calls_served: Some(supervisor.calls_served()),
                waiting,
            },
            Err(_) => EngineStatus {
                name: self.name.clone(),
                alive: None,
                state: "busy".to_string(),
                pid: None,
                calls_served: None,
                waiting,
            },
        }
    }

    async fn start(&self) -> Result<(), BridgeError> {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.start().await?;
        crate::metrics::set_worker_alive(&self.name, true);
        Ok(())
    }

    async fn stop(&self) {
        self.supervisor.lock().await.stop().await;
        crate::metrics::set_worker_alive(&self.name, false);
    }
}

/// Counts a call as waiting until dropped, however the wait ends
struct WaitingGuard<'a> {
    engine: &'a str,
    count: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn enter(engine: &'a str, count: &'a AtomicUsize) -> Self {
        let waiting = count.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::set_calls_waiting(engine, waiting);
        Self { engine, count }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let waiting = self.count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        crate::metrics::set_calls_waiting(self.engine, waiting);
    }
}

fn failure(kind: FailureKind, message: String) -> ErrorDetail {
    ErrorDetail { kind, message }
}

/// Shared application state for the front-end.
#[derive(Clone)]
pub struct AppState {
    /// Engines by name; fixed after startup
    engines: Arc<BTreeMap<String, Arc<EngineHandle>>>,

    default_engine: String,

    /// Service start time for uptime calculations
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create supervisors for every configured engine and start their workers.
    pub async fn start(config: &ServerConfig) -> Result<Self, BridgeError> {
        let mut engines = BTreeMap::new();
        for (name, worker) in &config.engines {
            let supervisor = Supervisor::new(name.clone(), worker.clone())?;
            engines.insert(name.clone(), Arc::new(EngineHandle::new(name.clone(), supervisor)));
        }

        let state = Self {
            engines: Arc::new(engines),
            default_engine: config.default_engine.clone(),
            started_at: chrono::Utc::now(),
        };

        for engine in state.engines.values() {
            if let Err(e) = engine.start().await {
                state.shutdown().await;
                return Err(e);
            }
            info!(engine = %engine.name, "Engine started");
        }
        Ok(state)
    }

    /// Resolve an engine by name, falling back to the default.
    pub fn engine(&self, name: Option<&str>) -> Option<Arc<EngineHandle>> {
        self.engines
            .get(name.unwrap_or(&self.default_engine))
            .cloned()
    }

    pub fn default_engine(&self) -> &str {
        &self.default_engine
    }

    pub fn engine_names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn statuses(&self) -> Vec<EngineStatus> {
        self.engines.values().map(|e| e.status()).collect()
    }

    /// Stop every worker.
    pub async fn shutdown(&self) {
        for engine in self.engines.values() {
            engine.stop().await;
        }
        info!("All engines stopped");
    }

    /// Get service uptime in seconds.
    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }
}
