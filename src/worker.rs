//! `shipyard worker`: executes the orchestration graph for exactly one run.
//!
//! Spawned detached by the lifecycle manager. The worker claims its run
//! (`pending` → `running`), invokes the graph on the run's thread and settles
//! the run from the outcome. SIGTERM or Ctrl-C abandons the graph and records
//! the stop through the same compare-and-set the `stop` command uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use shipyard_common::{AgentRun, AgentRunStatus, Feature, PrSummary, SdlcLifecycle, StepStatus};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use crate::checkpoint::SqliteCheckpointStore;
use crate::config::ShipyardConfig;
use crate::executor::{AgentKind, ExecutorSettings, create_executor};
use crate::graph::host::{GhCliHost, ensure_branch};
use crate::graph::report::RunReporter;
use crate::graph::{GraphConfig, GraphOutcome, GraphState, OrchestrationGraph, ResumeSignal};
use crate::lifecycle::STOP_NOTE;
use crate::phase::Phase;
use crate::process::{OsProcessControl, ProcessControl};
use crate::steps::StepRecorder;
use crate::store::{DbHandle, ShipyardDb};
use crate::unblock::advance_lifecycle;

/// Reporter that writes graph progress into the store.
pub struct StoreReporter {
    db: DbHandle,
    process: Arc<dyn ProcessControl>,
    feature_id: String,
    run_id: String,
    steps: StepRecorder,
}

impl StoreReporter {
    pub fn new(db: DbHandle, process: Arc<dyn ProcessControl>, feature_id: &str, run_id: &str) -> Self {
        Self {
            steps: StepRecorder::new(db.clone(), run_id),
            db,
            process,
            feature_id: feature_id.to_string(),
            run_id: run_id.to_string(),
        }
    }
}

#[async_trait]
impl RunReporter for StoreReporter {
    async fn phase_started(&self, phase: Phase) -> Result<()> {
        self.steps.begin(&format!("phase:{}", phase)).await;
        advance_lifecycle(&self.db, self.process.as_ref(), &self.feature_id, phase.lifecycle()).await?;
        Ok(())
    }

    async fn phase_finished(&self, _phase: Phase, detail: &str) -> Result<()> {
        self.steps.end(StepStatus::Completed, Some(detail)).await;
        Ok(())
    }

    async fn session_updated(&self, session_id: &str) -> Result<()> {
        let (run_id, session_id) = (self.run_id.clone(), session_id.to_string());
        self.db
            .call(move |db| db.set_run_session(&run_id, &session_id))
            .await
    }

    async fn pr_updated(&self, pr: &PrSummary) -> Result<()> {
        let (feature_id, pr) = (self.feature_id.clone(), pr.clone());
        self.db
            .call(move |db| db.set_feature_pr(&feature_id, Some(&pr)))
            .await
    }

    async fn event(&self, name: &str, detail: &str) -> Result<()> {
        let status = if name.ends_with("_failed") {
            StepStatus::Failed
        } else {
            StepStatus::Completed
        };
        self.steps.event(name, status, Some(detail)).await;
        Ok(())
    }
}

/// Entry point of the worker process.
pub async fn run(config: &ShipyardConfig, run_id: &str, signal_value: Option<ResumeSignal>) -> Result<()> {
    let db = DbHandle::new(ShipyardDb::new(&config.db_path())?);
    let pid = std::process::id();
    let id = run_id.to_string();
    let claimed = db.call(move |db| db.mark_running(&id, pid)).await?;
    if !claimed {
        info!(run_id, "run is no longer pending, exiting");
        return Ok(());
    }
    info!(run_id, pid, "worker claimed run");

    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let process: Arc<dyn ProcessControl> = Arc::new(OsProcessControl::new(config.home.clone(), config.log_dir()));

    let outcome = tokio::select! {
        result = execute(config, &db, process.clone(), run_id, signal_value) => Some(result),
        _ = term.recv() => None,
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        None => {
            warn!(run_id, "received shutdown signal");
            let id = run_id.to_string();
            let won = db.call(move |db| db.interrupt_run(&id, STOP_NOTE)).await?;
            if won {
                record(&db, run_id, "stopped", StepStatus::Completed, Some(STOP_NOTE)).await;
            }
        }
        Some(Ok((feature, GraphOutcome::Completed { pr_url }))) => {
            let lifecycle = if pr_url.is_some() {
                SdlcLifecycle::Review
            } else {
                SdlcLifecycle::Maintain
            };
            let summary = match &pr_url {
                Some(url) => format!("Completed; pull request {}", url),
                None => "Completed".to_string(),
            };
            settle(&db, run_id, AgentRunStatus::Completed, Some(&summary), None).await?;
            advance_lifecycle(&db, process.as_ref(), &feature.id, lifecycle).await?;
            record(&db, run_id, "completed", StepStatus::Completed, pr_url.as_deref()).await;
            info!(run_id, %lifecycle, "run completed");
        }
        Some(Ok((_, GraphOutcome::Interrupted { phase }))) => {
            let note = format!("Waiting for approval after {} phase", phase);
            settle(&db, run_id, AgentRunStatus::WaitingApproval, Some(&note), None).await?;
            record(&db, run_id, "waiting_approval", StepStatus::Completed, Some(phase.as_str())).await;
            info!(run_id, %phase, "run suspended at approval gate");
        }
        Some(Err(e)) => {
            let message = format!("{:#}", e);
            error!(run_id, error = %message, "run failed");
            settle(&db, run_id, AgentRunStatus::Failed, None, Some(&message)).await?;
            record(&db, run_id, "failed", StepStatus::Failed, Some(&message)).await;
        }
    }
    Ok(())
}

async fn execute(
    config: &ShipyardConfig,
    db: &DbHandle,
    process: Arc<dyn ProcessControl>,
    run_id: &str,
    signal_value: Option<ResumeSignal>,
) -> Result<(Feature, GraphOutcome)> {
    let (run, feature) = load(db, run_id).await?;
    let spec_dir = feature
        .spec_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.specs_dir().join(&feature.slug));
    let repository = PathBuf::from(&feature.repository_path);
    ensure_branch(&repository, &feature.branch)?;

    let kind: AgentKind = run.agent_kind.parse().map_err(|e: String| anyhow!(e))?;
    let executor = create_executor(kind, ExecutorSettings::from_config(config, kind));
    let reporter = Arc::new(StoreReporter::new(db.clone(), process, &feature.id, &run.id));
    let graph = OrchestrationGraph::new(
        executor,
        Arc::new(SqliteCheckpointStore::new(db.clone())),
        Arc::new(GhCliHost::from_config(config)),
        reporter,
        GraphConfig::from_config(config),
    );

    let initial = GraphState::for_feature(&feature, &run, spec_dir);
    let outcome = graph.invoke(&run.thread_id, initial, signal_value).await?;
    Ok((feature, outcome))
}

async fn load(db: &DbHandle, run_id: &str) -> Result<(AgentRun, Feature)> {
    let id = run_id.to_string();
    db.call(move |db| {
        let run = db
            .get_run(&id)?
            .with_context(|| format!("Agent run {} not found", id))?;
        let feature = db
            .get_feature(&run.feature_id)?
            .with_context(|| format!("Feature {} not found", run.feature_id))?;
        Ok((run, feature))
    })
    .await
}

async fn settle(
    db: &DbHandle,
    run_id: &str,
    status: AgentRunStatus,
    result: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let id = run_id.to_string();
    let result = result.map(str::to_string);
    let error = error.map(str::to_string);
    let settled = db
        .call(move |db| db.finish_run(&id, status, result.as_deref(), error.as_deref()))
        .await?;
    if !settled {
        warn!(run_id, %status, "run was no longer running; outcome not recorded");
    }
    Ok(())
}

async fn record(db: &DbHandle, run_id: &str, name: &str, status: StepStatus, detail: Option<&str>) {
    let (id, name) = (run_id.to_string(), name.to_string());
    let detail = detail.map(str::to_string);
    if let Err(e) = db
        .call(move |db| db.insert_event_step(&id, &name, status, detail.as_deref()))
        .await
    {
        warn!(error = %e, "failed to record execution step");
    }
}
