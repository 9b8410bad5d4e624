//! Scripted collaborators for graph tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use shipyard_common::PrSummary;
use tokio::sync::mpsc;

use crate::errors::ExecutorError;
use crate::executor::{
    AgentEvent, AgentExecutor, AgentKind, ExecuteOptions, ExecutionResult, ExecutorFeature,
};
use crate::phase::Phase;

use super::host::{CiRun, CiWatch, PullRequest, RepoHost};
use super::report::RunReporter;

type Script = Box<dyn Fn(&str, usize) -> Result<ExecutionResult, ExecutorError> + Send + Sync>;

/// Executor whose behavior is a closure of (prompt, call index).
pub struct ScriptedExecutor {
    script: Script,
    session_resume: bool,
    pub prompts: Mutex<Vec<String>>,
    pub resumed_sessions: Mutex<Vec<Option<String>>>,
}

impl ScriptedExecutor {
    pub fn new(
        script: impl Fn(&str, usize) -> Result<ExecutionResult, ExecutorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            session_resume: true,
            prompts: Mutex::new(Vec::new()),
            resumed_sessions: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `done` with session `sess-1`.
    pub fn ok() -> Self {
        Self::new(|_, _| Ok(reply("done")))
    }

    pub fn without_session_resume(mut self) -> Self {
        self.session_resume = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

pub fn reply(text: &str) -> ExecutionResult {
    ExecutionResult {
        result: text.to_string(),
        session_id: Some("sess-1".into()),
        metadata: None,
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn supports_feature(&self, feature: ExecutorFeature) -> bool {
        match feature {
            ExecutorFeature::SessionResume => self.session_resume,
            ExecutorFeature::Streaming => false,
        }
    }

    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let index = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };
        self.resumed_sessions
            .lock()
            .unwrap()
            .push(options.resume_session.clone());
        (self.script)(prompt, index)
    }

    async fn execute_stream(
        &self,
        _prompt: &str,
        _options: &ExecuteOptions,
    ) -> Result<mpsc::Receiver<AgentEvent>, ExecutorError> {
        Err(ExecutorError::Agent("streaming not scripted".into()))
    }
}

/// Host that replays a fixed sequence of CI watch results.
pub struct ScriptedHost {
    has_ci: bool,
    watches: Mutex<VecDeque<CiWatch>>,
    next_run: AtomicU32,
    pub commits: AtomicU32,
    pub pushes: AtomicU32,
    pub prs: AtomicU32,
    pub log_fetches: AtomicU32,
    fail_push: bool,
}

impl ScriptedHost {
    pub fn new(watches: Vec<CiWatch>) -> Self {
        Self {
            has_ci: true,
            watches: Mutex::new(watches.into()),
            next_run: AtomicU32::new(100),
            commits: AtomicU32::new(0),
            pushes: AtomicU32::new(0),
            prs: AtomicU32::new(0),
            log_fetches: AtomicU32::new(0),
            fail_push: false,
        }
    }

    /// A repository without any CI workflow.
    pub fn without_ci() -> Self {
        let mut host = Self::new(Vec::new());
        host.has_ci = false;
        host
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoHost for ScriptedHost {
    async fn commit_all(&self, _cwd: &Path, _message: &str) -> Result<String> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{:040x}", n))
    }

    async fn push_branch(&self, _cwd: &Path, _branch: &str) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_push {
            bail!("remote rejected push");
        }
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _cwd: &Path,
        _branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<PullRequest> {
        self.prs.fetch_add(1, Ordering::SeqCst);
        Ok(PullRequest {
            url: "https://github.com/acme/app/pull/42".into(),
            number: 42,
        })
    }

    async fn latest_ci_run(&self, _cwd: &Path, _branch: &str) -> Result<Option<CiRun>> {
        if !self.has_ci {
            return Ok(None);
        }
        let id = self.next_run.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CiRun {
            id: id.to_string(),
            url: None,
        }))
    }

    async fn watch_ci_run(&self, _cwd: &Path, _run: &CiRun, _timeout: Duration) -> Result<CiWatch> {
        Ok(self
            .watches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CiWatch::Failed))
    }

    async fn failed_logs(&self, _cwd: &Path, _run: &CiRun, _max_chars: usize) -> Result<String> {
        self.log_fetches.fetch_add(1, Ordering::SeqCst);
        Ok("test auth::login ... FAILED".into())
    }
}

/// Collects every report as a line of text.
#[derive(Default)]
pub struct RecordingReporter {
    pub lines: Mutex<Vec<String>>,
    pub prs: Mutex<Vec<PrSummary>>,
    /// When set, `event` records the line and then returns an error.
    pub failing_events: bool,
}

impl RecordingReporter {
    pub fn failing_events() -> Self {
        Self {
            failing_events: true,
            ..Self::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

#[async_trait]
impl RunReporter for RecordingReporter {
    async fn phase_started(&self, phase: Phase) -> Result<()> {
        self.push(format!("start {}", phase));
        Ok(())
    }

    async fn phase_finished(&self, phase: Phase, _detail: &str) -> Result<()> {
        self.push(format!("finish {}", phase));
        Ok(())
    }

    async fn session_updated(&self, session_id: &str) -> Result<()> {
        self.push(format!("session {}", session_id));
        Ok(())
    }

    async fn pr_updated(&self, pr: &PrSummary) -> Result<()> {
        self.prs.lock().unwrap().push(pr.clone());
        Ok(())
    }

    async fn event(&self, name: &str, _detail: &str) -> Result<()> {
        self.push(format!("event {}", name));
        if self.failing_events {
            bail!("step store unavailable");
        }
        Ok(())
    }
}
