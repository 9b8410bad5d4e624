//! Run lifecycle manager.
//!
//! Owns the worker process behind each agent run: creates and spawns runs,
//! stops them, detects crashed workers and continues interrupted, failed or
//! waiting runs. Every status change is a compare-and-set update in the
//! store, so concurrent callers (CLI, daemon sweep, the worker itself) never
//! record the same transition twice.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde_json::Value;
use shipyard_common::{AgentRun, AgentRunStatus, ApprovalGates, Feature, SdlcLifecycle, StepStatus};
use tracing::{debug, info, warn};

use crate::errors::LifecycleError;
use crate::executor::AgentKind;
use crate::graph::ResumeSignal;
use crate::phase::Phase;
use crate::process::{ProcessControl, WorkerSpec};
use crate::spec_dir::{QuestionAnswer, SpecDir};
use crate::store::{DbHandle, NewFeature, NewRun};

/// Error recorded on a run whose worker disappeared.
pub const CRASH_NOTE: &str = "Process exited unexpectedly";
/// Error recorded on a run stopped from the CLI or by signal.
pub const STOP_NOTE: &str = "Stopped by user";

/// How long `stop` waits for a signalled worker to exit.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Input to [`RunLifecycle::start_feature`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: Option<String>,
    pub description: String,
    pub repository_path: PathBuf,
    /// Parent feature key (id, id prefix or slug).
    pub parent: Option<String>,
    pub approval_gates: Option<ApprovalGates>,
    pub push: bool,
    pub open_pr: bool,
    pub agent_kind: AgentKind,
}

#[derive(Debug, Clone)]
pub struct StartedFeature {
    pub feature: Feature,
    pub run: AgentRun,
    /// False when the feature waits on its parent.
    pub spawned: bool,
}

/// Settings carried from one run to the run that continues it.
#[derive(Debug, Clone)]
pub struct RunTemplate {
    pub thread_id: String,
    pub agent_kind: String,
    pub approval_gates: Option<ApprovalGates>,
    pub session_id: Option<String>,
}

impl RunTemplate {
    pub fn fresh(agent_kind: AgentKind, approval_gates: Option<ApprovalGates>) -> Self {
        Self {
            thread_id: uuid::Uuid::new_v4().to_string(),
            agent_kind: agent_kind.to_string(),
            approval_gates,
            session_id: None,
        }
    }

    pub fn continuing(run: &AgentRun) -> Self {
        Self {
            thread_id: run.thread_id.clone(),
            agent_kind: run.agent_kind.clone(),
            approval_gates: run.approval_gates,
            session_id: run.session_id.clone(),
        }
    }
}

/// Spawn the worker for `spec` and record its pid. A failed spawn leaves the
/// run `interrupted` so it can be retried.
pub(crate) async fn spawn_worker(
    db: &DbHandle,
    process: &dyn ProcessControl,
    spec: WorkerSpec,
) -> anyhow::Result<u32> {
    let run_id = spec.run_id.clone();
    match process.spawn_worker(&spec) {
        Ok(pid) => {
            if !db.call(move |db| db.set_run_pid(&run_id, pid)).await? {
                debug!(pid, run_id = %spec.run_id, "run settled before its pid was recorded");
            }
            info!(pid, run_id = %spec.run_id, "worker spawned");
            Ok(pid)
        }
        Err(e) => {
            let note = format!("Failed to spawn worker: {}", e);
            db.call(move |db| db.interrupt_if_active(&run_id, &note)).await?;
            Err(e)
        }
    }
}

pub struct RunLifecycle {
    db: DbHandle,
    process: Arc<dyn ProcessControl>,
    specs_dir: PathBuf,
}

impl RunLifecycle {
    pub fn new(db: DbHandle, process: Arc<dyn ProcessControl>, specs_dir: PathBuf) -> Self {
        Self {
            db,
            process,
            specs_dir,
        }
    }

    /// Create a feature with its spec directory and first run, then spawn the
    /// worker. A feature whose parent has not reached implementation is
    /// created `Blocked`: its run is provisioned but not spawned.
    pub async fn start_feature(&self, req: StartRequest) -> Result<StartedFeature, LifecycleError> {
        let parent = match &req.parent {
            Some(key) => Some(self.find_feature(key).await?),
            None => None,
        };
        let blocked = parent
            .as_ref()
            .is_some_and(|p| !p.lifecycle.is_post_implementation());
        let lifecycle = if blocked {
            SdlcLifecycle::Blocked
        } else {
            SdlcLifecycle::Started
        };

        let new = NewFeature {
            name: req
                .name
                .clone()
                .unwrap_or_else(|| derive_name(&req.description)),
            description: req.description.clone(),
            repository_path: req.repository_path.display().to_string(),
            lifecycle,
            parent_id: parent.map(|p| p.id),
            push: req.push || req.open_pr,
            open_pr: req.open_pr,
        };
        let feature = self.db.call(move |db| db.insert_feature(&new)).await?;

        let spec_dir = SpecDir::new(self.specs_dir.join(&feature.slug));
        spec_dir.seed(&feature.name, &feature.description)?;
        let spec_path = spec_dir.root().display().to_string();
        let feature_id = feature.id.clone();
        self.db
            .call(move |db| db.set_spec_path(&feature_id, &spec_path))
            .await?;

        let run = self
            .create_run(&feature, RunTemplate::fresh(req.agent_kind, req.approval_gates))
            .await?;
        self.record(&run.id, "created", None).await;
        let feature = self.load_feature(&feature.id).await?;

        if blocked {
            info!(feature = %feature.slug, "feature blocked on parent; run provisioned");
            return Ok(StartedFeature {
                feature,
                run,
                spawned: false,
            });
        }
        spawn_worker(&self.db, self.process.as_ref(), WorkerSpec::start(&run.id)).await?;
        let run = self.load_run(&run.id).await?;
        Ok(StartedFeature {
            feature,
            run,
            spawned: true,
        })
    }

    /// Insert a `pending` run for `feature` and link it. Refused while the
    /// feature has an active run whose worker is alive.
    pub async fn create_run(
        &self,
        feature: &Feature,
        template: RunTemplate,
    ) -> Result<AgentRun, LifecycleError> {
        let feature_id = feature.id.clone();
        let active = self
            .db
            .call(move |db| db.active_run_for_feature(&feature_id))
            .await?;
        if let Some(active) = active {
            let active = self.detect_crash(active).await?;
            if active.status.is_active() {
                return Err(LifecycleError::AlreadyActive {
                    feature_id: feature.id.clone(),
                    run_id: active.id,
                });
            }
        }

        let new = NewRun {
            feature_id: feature.id.clone(),
            thread_id: template.thread_id,
            agent_kind: template.agent_kind,
            approval_gates: template.approval_gates,
            session_id: template.session_id,
        };
        let run = self.db.call(move |db| db.insert_run(&new)).await?;
        let (feature_id, run_id) = (feature.id.clone(), run.id.clone());
        self.db
            .call(move |db| db.set_feature_run(&feature_id, &run_id))
            .await?;
        Ok(run)
    }

    /// Stop the feature's current run. A worker that is already gone is not
    /// an error; the run still ends `interrupted`.
    pub async fn stop(&self, feature_key: &str) -> Result<AgentRun, LifecycleError> {
        let (_, run) = self.current_run(feature_key).await?;
        if run.status.is_terminal() || run.status == AgentRunStatus::Interrupted {
            return Err(LifecycleError::AlreadyFinished { status: run.status });
        }

        if let Some(pid) = run.pid {
            if self.process.is_alive(pid) {
                info!(pid, run_id = %run.id, "sending SIGTERM to worker");
                self.process.terminate(pid)?;
                if !self.process.wait_exit(pid, STOP_GRACE).await {
                    warn!(pid, "worker did not exit within grace period");
                }
            } else {
                info!(pid, run_id = %run.id, "worker already exited");
            }
        }

        let run_id = run.id.clone();
        let won = self
            .db
            .call(move |db| db.interrupt_run(&run_id, STOP_NOTE))
            .await?;
        if won {
            self.record(&run.id, "stopped", Some(STOP_NOTE)).await;
        }
        self.load_run(&run.id).await
    }

    pub async fn retry(&self, feature_key: &str) -> Result<AgentRun, LifecycleError> {
        self.continue_run(feature_key, "retry").await
    }

    pub async fn resume(&self, feature_key: &str) -> Result<AgentRun, LifecycleError> {
        self.continue_run(feature_key, "resume").await
    }

    /// Start a new run on the same thread as the feature's current run.
    async fn continue_run(
        &self,
        feature_key: &str,
        action: &str,
    ) -> Result<AgentRun, LifecycleError> {
        let (feature, run) = self.current_run(feature_key).await?;
        let run = self.detect_crash(run).await?;
        match run.status {
            AgentRunStatus::Pending
                if feature.lifecycle == SdlcLifecycle::Blocked && run.pid.is_none() =>
            {
                return Err(LifecycleError::Blocked {
                    feature_id: feature.id,
                });
            }
            AgentRunStatus::Running | AgentRunStatus::Pending => {
                return Err(LifecycleError::StillRunning { run_id: run.id });
            }
            AgentRunStatus::Completed => {
                return Err(LifecycleError::AlreadyCompleted { run_id: run.id });
            }
            status if !status.is_resumable() => {
                return Err(LifecycleError::NotResumable { status });
            }
            _ => {}
        }

        let next = self.create_run(&feature, RunTemplate::continuing(&run)).await?;
        if run.status == AgentRunStatus::WaitingApproval {
            let (old, note) = (run.id.clone(), format!("Superseded by run {}", next.id));
            self.db.call(move |db| db.interrupt_run(&old, &note)).await?;
        }
        info!(
            action,
            previous = %run.id,
            run_id = %next.id,
            thread_id = %next.thread_id,
            "continuing run"
        );
        self.record(&next.id, action, Some(&format!("continues run {}", run.id)))
            .await;
        spawn_worker(&self.db, self.process.as_ref(), WorkerSpec::resume(&next.id)).await?;
        self.load_run(&next.id).await
    }

    /// Approve the waiting phase, optionally answering open questions in
    /// `spec.yaml` first. The same run continues.
    pub async fn approve(
        &self,
        feature_key: &str,
        answers: &[QuestionAnswer],
    ) -> Result<AgentRun, LifecycleError> {
        let (feature, run) = self.waiting_run(feature_key).await?;
        if !answers.is_empty() {
            let spec_path = feature
                .spec_path
                .as_ref()
                .ok_or_else(|| anyhow!("Feature {} has no spec directory", feature.slug))?;
            SpecDir::new(spec_path).apply_answers(answers)?;
        }
        self.deliver(run, ResumeSignal::Approved, "approved", None).await
    }

    /// Reject the waiting phase; it re-executes with `feedback`.
    pub async fn reject(
        &self,
        feature_key: &str,
        feedback: &str,
    ) -> Result<AgentRun, LifecycleError> {
        let (_, run) = self.waiting_run(feature_key).await?;
        let signal = ResumeSignal::Rejected {
            feedback: feedback.to_string(),
        };
        self.deliver(run, signal, "rejected", Some(feedback)).await
    }

    async fn deliver(
        &self,
        run: AgentRun,
        signal: ResumeSignal,
        step: &str,
        detail: Option<&str>,
    ) -> Result<AgentRun, LifecycleError> {
        let run_id = run.id.clone();
        let requeued = self
            .db
            .call(move |db| db.requeue_waiting_run(&run_id))
            .await?;
        if !requeued {
            let current = self.load_run(&run.id).await?;
            return Err(LifecycleError::NotWaitingApproval {
                status: current.status,
            });
        }
        self.record(&run.id, step, detail).await;
        spawn_worker(
            &self.db,
            self.process.as_ref(),
            WorkerSpec::with_signal(&run.id, signal),
        )
        .await?;
        self.load_run(&run.id).await
    }

    /// Reclassify an active run whose worker is gone as `interrupted`.
    /// Returns the run as stored afterwards.
    pub async fn detect_crash(&self, run: AgentRun) -> Result<AgentRun, LifecycleError> {
        if !run.status.is_active() {
            return Ok(run);
        }
        let Some(pid) = run.pid else {
            return Ok(run);
        };
        if self.process.is_alive(pid) {
            return Ok(run);
        }
        let run_id = run.id.clone();
        let moved = self
            .db
            .call(move |db| db.interrupt_if_active(&run_id, CRASH_NOTE))
            .await?;
        if moved {
            warn!(pid, run_id = %run.id, "worker died; run marked interrupted");
            self.record(&run.id, "crash_detected", Some(CRASH_NOTE)).await;
        }
        self.load_run(&run.id).await
    }

    /// Crash detection over every active run. Returns ids reclassified.
    pub async fn sweep(&self) -> Result<Vec<String>, LifecycleError> {
        let active = self.db.call(|db| db.list_active_runs()).await?;
        let mut crashed = Vec::new();
        for run in active {
            let before = run.status;
            let after = self.detect_crash(run).await?;
            if before != after.status {
                crashed.push(after.id);
            }
        }
        Ok(crashed)
    }

    /// Most recently updated feature whose current run has one of `statuses`.
    pub async fn latest_feature_with(
        &self,
        statuses: &[AgentRunStatus],
    ) -> Result<Option<Feature>, LifecycleError> {
        let statuses = statuses.to_vec();
        let found = self
            .db
            .call(move |db| {
                let mut best: Option<Feature> = None;
                for feature in db.list_features()? {
                    let Some(run_id) = &feature.agent_run_id else {
                        continue;
                    };
                    let Some(run) = db.get_run(run_id)? else {
                        continue;
                    };
                    if statuses.contains(&run.status)
                        && best.as_ref().is_none_or(|b| feature.updated_at > b.updated_at)
                    {
                        best = Some(feature);
                    }
                }
                Ok(best)
            })
            .await?;
        Ok(found)
    }

    /// The phase a waiting run is suspended at, read from its checkpoint.
    pub async fn waiting_phase(&self, run: &AgentRun) -> Result<Option<Phase>, LifecycleError> {
        let thread_id = run.thread_id.clone();
        let raw = self
            .db
            .call(move |db| db.get_checkpoint(&thread_id))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&raw).context("Failed to parse checkpoint")?;
        Ok(value
            .get("awaitingApproval")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()))
    }

    pub async fn find_feature(&self, key: &str) -> Result<Feature, LifecycleError> {
        let owned = key.to_string();
        self.db
            .call(move |db| db.find_feature(&owned))
            .await?
            .ok_or_else(|| LifecycleError::FeatureNotFound { id: key.to_string() })
    }

    async fn load_feature(&self, id: &str) -> Result<Feature, LifecycleError> {
        let owned = id.to_string();
        self.db
            .call(move |db| db.get_feature(&owned))
            .await?
            .ok_or_else(|| LifecycleError::FeatureNotFound { id: id.to_string() })
    }

    async fn load_run(&self, id: &str) -> Result<AgentRun, LifecycleError> {
        let owned = id.to_string();
        self.db
            .call(move |db| db.get_run(&owned))
            .await?
            .ok_or_else(|| LifecycleError::RunNotFound { id: id.to_string() })
    }

    pub async fn current_run(&self, feature_key: &str) -> Result<(Feature, AgentRun), LifecycleError> {
        let feature = self.find_feature(feature_key).await?;
        let run_id = feature
            .agent_run_id
            .clone()
            .ok_or_else(|| LifecycleError::NoRun {
                feature_id: feature.id.clone(),
            })?;
        let run = self.load_run(&run_id).await?;
        Ok((feature, run))
    }

    async fn waiting_run(&self, feature_key: &str) -> Result<(Feature, AgentRun), LifecycleError> {
        let (feature, run) = self.current_run(feature_key).await?;
        if run.status != AgentRunStatus::WaitingApproval {
            return Err(LifecycleError::NotWaitingApproval { status: run.status });
        }
        Ok((feature, run))
    }

    /// Execution steps are observability only; failures are logged.
    async fn record(&self, run_id: &str, name: &str, detail: Option<&str>) {
        let (run_id, name) = (run_id.to_string(), name.to_string());
        let detail = detail.map(str::to_string);
        let result = self
            .db
            .call(move |db| {
                db.insert_event_step(&run_id, &name, StepStatus::Completed, detail.as_deref())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to record execution step");
        }
    }
}

/// Feature name from the first line of a description.
fn derive_name(description: &str) -> String {
    let line = description.lines().next().unwrap_or("").trim();
    let mut name: String = line.chars().take(60).collect();
    if line.chars().count() > 60
        && let Some(cut) = name.rfind(' ')
    {
        name.truncate(cut);
    }
    if name.is_empty() {
        "Untitled feature".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeProcessControl;
    use crate::store::ShipyardDb;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        lifecycle: RunLifecycle,
        db: DbHandle,
        process: Arc<FakeProcessControl>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db = DbHandle::new(ShipyardDb::new_in_memory().unwrap());
        let process = Arc::new(FakeProcessControl::new());
        let lifecycle = RunLifecycle::new(db.clone(), process.clone(), dir.path().join("specs"));
        Fixture {
            lifecycle,
            db,
            process,
            _dir: dir,
        }
    }

    fn request(description: &str) -> StartRequest {
        StartRequest {
            name: None,
            description: description.to_string(),
            repository_path: PathBuf::from("/tmp/repo"),
            parent: None,
            approval_gates: Some(ApprovalGates::default()),
            push: false,
            open_pr: false,
            agent_kind: AgentKind::ClaudeCode,
        }
    }

    impl Fixture {
        async fn start(&self, description: &str) -> StartedFeature {
            self.lifecycle.start_feature(request(description)).await.unwrap()
        }

        /// Worker claimed the run, then settled it with `status`.
        fn settle(&self, run: &AgentRun, status: AgentRunStatus) {
            let db = self.db.lock_sync().unwrap();
            assert!(db.mark_running(&run.id, run.pid.unwrap_or(1)).unwrap());
            assert!(db.finish_run(&run.id, status, None, None).unwrap());
        }

        fn run(&self, id: &str) -> AgentRun {
            self.db.lock_sync().unwrap().get_run(id).unwrap().unwrap()
        }

        fn steps_named(&self, run_id: &str, name: &str) -> i64 {
            self.db
                .lock_sync()
                .unwrap()
                .count_steps_named(run_id, name)
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_start_feature_spawns_worker_and_seeds_spec() {
        let f = fixture();
        let started = f.start("Add a login page").await;

        assert!(started.spawned);
        assert_eq!(started.feature.name, "Add a login page");
        assert_eq!(started.feature.agent_run_id.as_deref(), Some(started.run.id.as_str()));
        assert_eq!(started.run.status, AgentRunStatus::Pending);
        assert!(started.run.pid.is_some());
        assert_eq!(f.process.spawned(), vec![WorkerSpec::start(&started.run.id)]);

        let spec_path = started.feature.spec_path.unwrap();
        let spec = std::fs::read_to_string(PathBuf::from(spec_path).join("spec.yaml")).unwrap();
        assert!(spec.contains("Add a login page"));
    }

    #[tokio::test]
    async fn test_child_of_unfinished_parent_is_blocked_and_not_spawned() {
        let f = fixture();
        let parent = f.start("Auth backend").await;
        let mut req = request("Login UI");
        req.parent = Some(parent.feature.slug.clone());
        let child = f.lifecycle.start_feature(req).await.unwrap();

        assert!(!child.spawned);
        assert_eq!(child.feature.lifecycle, SdlcLifecycle::Blocked);
        assert_eq!(child.feature.parent_id.as_deref(), Some(parent.feature.id.as_str()));
        assert_eq!(child.run.status, AgentRunStatus::Pending);
        assert!(child.run.pid.is_none());
        assert_eq!(f.process.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_of_blocked_child_explains_the_wait() {
        let f = fixture();
        let parent = f.start("Auth backend").await;
        let mut req = request("Login UI");
        req.parent = Some(parent.feature.id.clone());
        let child = f.lifecycle.start_feature(req).await.unwrap();

        for result in [
            f.lifecycle.retry(&child.feature.id).await,
            f.lifecycle.resume(&child.feature.id).await,
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, LifecycleError::Blocked { .. }));
            assert!(err.to_string().contains("blocked until its parent"));
        }
        assert_eq!(f.run(&child.run.id).status, AgentRunStatus::Pending);
        assert_eq!(f.process.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_child_of_implemented_parent_starts() {
        let f = fixture();
        let parent = f.start("Auth backend").await;
        f.db.lock_sync()
            .unwrap()
            .set_lifecycle(&parent.feature.id, SdlcLifecycle::Implementation)
            .unwrap();
        let mut req = request("Login UI");
        req.parent = Some(parent.feature.id.clone());
        let child = f.lifecycle.start_feature(req).await.unwrap();
        assert!(child.spawned);
        assert_eq!(child.feature.lifecycle, SdlcLifecycle::Started);
    }

    #[tokio::test]
    async fn test_second_active_run_is_rejected() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        let err = f
            .lifecycle
            .create_run(&started.feature, RunTemplate::fresh(AgentKind::Codex, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyActive { .. }));

        f.process.kill(started.run.pid.unwrap());
        let run = f
            .lifecycle
            .create_run(&started.feature, RunTemplate::fresh(AgentKind::Codex, None))
            .await
            .unwrap();
        assert_eq!(run.status, AgentRunStatus::Pending);
        assert_eq!(f.run(&started.run.id).status, AgentRunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_stop_live_worker() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        let pid = started.run.pid.unwrap();

        let run = f.lifecycle.stop(&started.feature.id).await.unwrap();
        assert_eq!(run.status, AgentRunStatus::Interrupted);
        assert_eq!(run.error.as_deref(), Some(STOP_NOTE));
        assert!(run.pid.is_none());
        assert_eq!(f.process.terminated(), vec![pid]);
        assert_eq!(f.steps_named(&run.id, "stopped"), 1);

        let err = f.lifecycle.stop(&started.feature.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyFinished { .. }));
    }

    #[tokio::test]
    async fn test_stop_dead_worker_is_not_an_error() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.process.kill(started.run.pid.unwrap());

        let run = f.lifecycle.stop(&started.feature.slug).await.unwrap();
        assert_eq!(run.status, AgentRunStatus::Interrupted);
        assert!(f.process.terminated().is_empty());
        assert_eq!(f.steps_named(&run.id, "stopped"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stops_record_once() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.process.kill(started.run.pid.unwrap());

        let key = started.feature.id.clone();
        let (a, b) = tokio::join!(f.lifecycle.stop(&key), f.lifecycle.stop(&key));
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(f.run(&started.run.id).status, AgentRunStatus::Interrupted);
        assert_eq!(f.steps_named(&started.run.id, "stopped"), 1);
    }

    #[tokio::test]
    async fn test_stop_waiting_run() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.settle(&started.run, AgentRunStatus::WaitingApproval);
        let run = f.lifecycle.stop(&started.feature.id).await.unwrap();
        assert_eq!(run.status, AgentRunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_retry_failed_run_keeps_thread_and_gates() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.settle(&started.run, AgentRunStatus::Failed);
        f.db.lock_sync()
            .unwrap()
            .set_run_session(&started.run.id, "sess-9")
            .unwrap();

        let next = f.lifecycle.retry(&started.feature.id).await.unwrap();
        assert_ne!(next.id, started.run.id);
        assert_eq!(next.thread_id, started.run.thread_id);
        assert_eq!(next.approval_gates, started.run.approval_gates);
        assert_eq!(next.session_id.as_deref(), Some("sess-9"));
        assert_eq!(next.agent_kind, started.run.agent_kind);
        assert_eq!(f.process.spawned().last(), Some(&WorkerSpec::resume(&next.id)));

        let feature = f.lifecycle.find_feature(&started.feature.id).await.unwrap();
        assert_eq!(feature.agent_run_id.as_deref(), Some(next.id.as_str()));
        assert_eq!(f.steps_named(&next.id, "retry"), 1);
    }

    #[tokio::test]
    async fn test_resume_rejects_live_and_completed_runs() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        let err = f.lifecycle.resume(&started.feature.id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Agent is still running; stop it first before resuming"
        );

        f.settle(&started.run, AgentRunStatus::Completed);
        let err = f.lifecycle.retry(&started.feature.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyCompleted { .. }));
        assert_eq!(f.process.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_reclassifies_crashed_run_first() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        let pid = started.run.pid.unwrap();
        f.db.lock_sync()
            .unwrap()
            .mark_running(&started.run.id, pid)
            .unwrap();
        f.process.kill(pid);

        let next = f.lifecycle.retry(&started.feature.id).await.unwrap();
        let old = f.run(&started.run.id);
        assert_eq!(old.status, AgentRunStatus::Interrupted);
        assert_eq!(old.error.as_deref(), Some(CRASH_NOTE));
        assert_eq!(next.thread_id, old.thread_id);
        assert_eq!(f.steps_named(&old.id, "crash_detected"), 1);
    }

    #[tokio::test]
    async fn test_approve_requeues_same_run_with_answers() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.settle(&started.run, AgentRunStatus::WaitingApproval);

        let answers = vec![QuestionAnswer {
            question: "Support SSO?".into(),
            answer: "Not yet".into(),
        }];
        let run = f.lifecycle.approve(&started.feature.id, &answers).await.unwrap();
        assert_eq!(run.id, started.run.id);
        assert_eq!(run.status, AgentRunStatus::Pending);
        assert_eq!(
            f.process.spawned().last(),
            Some(&WorkerSpec::with_signal(&run.id, ResumeSignal::Approved))
        );

        let spec_path = started.feature.spec_path.unwrap();
        let spec = std::fs::read_to_string(PathBuf::from(spec_path).join("spec.yaml")).unwrap();
        assert!(spec.contains("Not yet"));
    }

    #[tokio::test]
    async fn test_reject_carries_feedback() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        f.settle(&started.run, AgentRunStatus::WaitingApproval);

        f.lifecycle
            .reject(&started.feature.id, "Split into two pages")
            .await
            .unwrap();
        assert_eq!(
            f.process.spawned().last(),
            Some(&WorkerSpec::with_signal(
                &started.run.id,
                ResumeSignal::Rejected {
                    feedback: "Split into two pages".into()
                }
            ))
        );
        assert_eq!(f.steps_named(&started.run.id, "rejected"), 1);
    }

    #[tokio::test]
    async fn test_approve_requires_waiting_run() {
        let f = fixture();
        let started = f.start("Add a login page").await;
        let err = f
            .lifecycle
            .approve(&started.feature.id, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotWaitingApproval {
                status: AgentRunStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn test_sweep_only_touches_dead_workers() {
        let f = fixture();
        let alive = f.start("Feature one").await;
        let dead = f.start("Feature two").await;
        f.process.kill(dead.run.pid.unwrap());

        let crashed = f.lifecycle.sweep().await.unwrap();
        assert_eq!(crashed, vec![dead.run.id.clone()]);
        assert_eq!(f.run(&alive.run.id).status, AgentRunStatus::Pending);
    }

    #[tokio::test]
    async fn test_latest_feature_with_status() {
        let f = fixture();
        let first = f.start("Feature one").await;
        let _second = f.start("Feature two").await;
        f.settle(&first.run, AgentRunStatus::WaitingApproval);

        let found = f
            .lifecycle
            .latest_feature_with(&[AgentRunStatus::WaitingApproval])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.feature.id);
    }

    #[tokio::test]
    async fn test_unknown_feature() {
        let f = fixture();
        let err = f.lifecycle.retry("nope").await.unwrap_err();
        assert!(matches!(err, LifecycleError::FeatureNotFound { .. }));
    }

    #[test]
    fn test_derive_name() {
        assert_eq!(derive_name("Add login\nwith details"), "Add login");
        assert_eq!(derive_name("   "), "Untitled feature");
        let long = "word ".repeat(20);
        assert!(derive_name(&long).len() <= 60);
    }
}
