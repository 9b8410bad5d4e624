//! Optional long-lived daemon: status API and periodic crash sweep.
//!
//! `daemon start` records `{pid, port, startedAt}` in `daemon.json` under the
//! Shipyard home, serves read-only JSON over HTTP and reclassifies runs whose
//! workers died. The state file is removed on graceful shutdown; a file left
//! behind by a dead daemon is treated as absent.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::config::ShipyardConfig;
use crate::lifecycle::RunLifecycle;
use crate::process::{OsProcessControl, is_process_alive};
use crate::steps::build_tree;
use crate::store::{DbHandle, ShipyardDb};
use crate::util::{now_rfc3339, write_atomic};

// ── State file ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub pid: u32,
    pub port: u16,
    pub started_at: String,
}

impl DaemonState {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize daemon state")?;
        write_atomic(path, &json)
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(state))
    }

    /// The running daemon, if any. A state file whose pid is dead is removed.
    pub fn current(path: &Path) -> Result<Option<Self>> {
        let Some(state) = Self::read(path)? else {
            return Ok(None);
        };
        if is_process_alive(state.pid) {
            return Ok(Some(state));
        }
        info!(pid = state.pid, "removing stale daemon state file");
        remove_state(path)?;
        Ok(None)
    }
}

pub fn remove_state(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

// ── HTTP API ──────────────────────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/features", get(list_features))
        .route("/api/features/{id}", get(get_feature))
        .route("/api/features/{id}/runs", get(list_feature_runs))
        .route("/api/runs/{id}/steps", get(get_run_steps))
}

pub fn build_router(state: SharedState) -> Router {
    api_router().with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_features(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let features = state.db.call(|db| db.list_features()).await?;
    Ok(Json(features))
}

async fn get_feature(
    State(state): State<SharedState>,
    UrlPath(id): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = id.clone();
    let found = state
        .db
        .call(move |db| {
            let Some(feature) = db.find_feature(&key)? else {
                return Ok(None);
            };
            let run = match &feature.agent_run_id {
                Some(run_id) => db.get_run(run_id)?,
                None => None,
            };
            Ok(Some((feature, run)))
        })
        .await?;
    let (feature, run) = found.ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;
    Ok(Json(json!({ "feature": feature, "run": run })))
}

async fn list_feature_runs(
    State(state): State<SharedState>,
    UrlPath(id): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = id.clone();
    let runs = state
        .db
        .call(move |db| match db.find_feature(&key)? {
            Some(feature) => db.list_runs_for_feature(&feature.id).map(Some),
            None => Ok(None),
        })
        .await?;
    let runs = runs.ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", id)))?;
    Ok(Json(runs))
}

async fn get_run_steps(
    State(state): State<SharedState>,
    UrlPath(id): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = id.clone();
    let found = state
        .db
        .call(move |db| match db.get_run(&run_id)? {
            Some(_) => db.list_steps(&run_id).map(Some),
            None => Ok(None),
        })
        .await?;
    let steps = found.ok_or_else(|| ApiError::NotFound(format!("Agent run {} not found", id)))?;
    Ok(Json(build_tree(steps)))
}

// ── Server ────────────────────────────────────────────────────────────

/// Run the daemon in the foreground until SIGTERM or Ctrl-C.
pub async fn start(config: &ShipyardConfig, port: u16) -> Result<()> {
    config.ensure_dirs()?;
    let state_path = config.daemon_state_path();
    if let Some(existing) = DaemonState::current(&state_path)? {
        anyhow::bail!(
            "Daemon already running (pid {}, port {})",
            existing.pid,
            existing.port
        );
    }

    let db = DbHandle::new(ShipyardDb::new(&config.db_path()).context("Failed to open database")?);
    let lifecycle = Arc::new(RunLifecycle::new(
        db.clone(),
        Arc::new(OsProcessControl::new(config.home.clone(), config.log_dir())),
        config.specs_dir(),
    ));

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;

    DaemonState {
        pid: std::process::id(),
        port: local_addr.port(),
        started_at: now_rfc3339(),
    }
    .write(&state_path)?;
    println!("Shipyard daemon listening on http://{}", local_addr);

    let interval = Duration::from_secs(config.toml.daemon.sweep_interval_secs.max(1));
    let sweeper = tokio::spawn(sweep_loop(lifecycle, interval));

    let app = build_router(Arc::new(AppState { db }));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    sweeper.abort();
    remove_state(&state_path)?;
    println!("Daemon shut down.");
    served
}

async fn sweep_loop(lifecycle: Arc<RunLifecycle>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match lifecycle.sweep().await {
            Ok(crashed) if !crashed.is_empty() => {
                info!(count = crashed.len(), runs = ?crashed, "reclassified crashed runs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "crash sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    info!("shutting down daemon");
}
