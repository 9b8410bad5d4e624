//! CI watch/fix loop run at the end of the merge phase.
//!
//! Watch the branch's CI run; while it fails, hand the failed-job logs to
//! the agent, push its fix and watch the new run. Every fix attempt appends
//! exactly one [`CiFixRecord`] to the state's history. The loop is bounded
//! by `ci.max_attempts` and checks the ceiling before doing any work.

use shipyard_common::{CiFixOutcome, CiFixRecord, CiStatus, PrStatus, PrSummary};
use tracing::{info, warn};

use crate::config::CiSection;
use crate::errors::CiError;
use crate::executor::{AgentExecutor, ExecuteOptions};
use crate::util::{now_rfc3339, truncate_tail};

use super::host::{CiRun, CiWatch, RepoHost};
use super::prompts::ci_fix_prompt;
use super::report::RunReporter;
use super::state::GraphState;

/// Characters of failure log kept on each history record.
const RECORD_LOG_CHARS: usize = 2_000;

pub struct CiLoop<'a> {
    pub host: &'a dyn RepoHost,
    pub fixer: &'a dyn AgentExecutor,
    pub reporter: &'a dyn RunReporter,
    pub limits: &'a CiSection,
    pub options: ExecuteOptions,
}

impl CiLoop<'_> {
    /// Returns once CI passes (or the branch has no CI). Timeouts and
    /// exhaustion mark the PR's CI status failed and return the history.
    pub async fn run(&self, state: &mut GraphState) -> Result<(), CiError> {
        let cwd = state.worktree_path.clone();
        let Some(mut run) = self
            .host
            .latest_ci_run(&cwd, &state.branch)
            .await
            .map_err(CiError::Host)?
        else {
            info!(branch = %state.branch, "no CI run for branch");
            return Ok(());
        };

        self.set_ci_status(state, CiStatus::Pending).await;
        match self.watch(state, &run).await? {
            CiWatch::Passed => {
                self.set_ci_status(state, CiStatus::Success).await;
                return Ok(());
            }
            CiWatch::TimedOut => {
                let record = CiFixRecord {
                    attempt: state.ci_fix_attempts,
                    started_at: now_rfc3339(),
                    failure_logs: String::new(),
                    outcome: CiFixOutcome::Timeout,
                };
                state.ci_fix_history.push(record);
                self.set_ci_status(state, CiStatus::Failure).await;
                return Err(CiError::Timeout {
                    history: state.ci_fix_history.clone(),
                });
            }
            CiWatch::Failed => {}
        }

        loop {
            if state.ci_fix_attempts >= self.limits.max_attempts {
                warn!(attempts = state.ci_fix_attempts, "CI fix attempts exhausted");
                self.set_ci_status(state, CiStatus::Failure).await;
                return Err(CiError::Exhausted {
                    history: state.ci_fix_history.clone(),
                });
            }

            state.ci_fix_attempts += 1;
            let attempt = state.ci_fix_attempts;
            let started_at = now_rfc3339();
            info!(attempt, max = self.limits.max_attempts, run = %run.id, "CI failed, attempting fix");

            let logs = match self
                .host
                .failed_logs(&cwd, &run, self.limits.log_max_chars)
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(error = %e, "could not fetch CI logs");
                    format!("(failed to fetch CI logs: {})", e)
                }
            };
            let logs = truncate_tail(&logs, self.limits.log_max_chars);
            if let Err(e) = self
                .reporter
                .event("ci_fix_attempt", &format!("attempt {}", attempt))
                .await
            {
                warn!(error = %e, "failed to record CI fix attempt");
            }

            let mut record = CiFixRecord {
                attempt,
                started_at,
                failure_logs: truncate_tail(&logs, RECORD_LOG_CHARS),
                outcome: CiFixOutcome::Failed,
            };

            if let Err(e) = self.apply_fix(state, &logs, attempt).await {
                warn!(attempt, error = %e, "CI fix attempt did not produce a pushed change");
                state.ci_fix_history.push(record);
                continue;
            }

            run = match self.host.latest_ci_run(&cwd, &state.branch).await {
                Ok(Some(next)) => next,
                Ok(None) => run,
                Err(e) => {
                    warn!(error = %e, "could not find new CI run, re-watching previous");
                    run
                }
            };

            match self.watch(state, &run).await? {
                CiWatch::Passed => {
                    record.outcome = CiFixOutcome::Fixed;
                    state.ci_fix_history.push(record);
                    self.set_ci_status(state, CiStatus::Success).await;
                    info!(attempt, "CI fixed");
                    return Ok(());
                }
                CiWatch::Failed => {
                    state.ci_fix_history.push(record);
                }
                CiWatch::TimedOut => {
                    record.outcome = CiFixOutcome::Timeout;
                    state.ci_fix_history.push(record);
                    self.set_ci_status(state, CiStatus::Failure).await;
                    return Err(CiError::Timeout {
                        history: state.ci_fix_history.clone(),
                    });
                }
            }
        }
    }

    async fn watch(&self, state: &GraphState, run: &CiRun) -> Result<CiWatch, CiError> {
        self.host
            .watch_ci_run(&state.worktree_path, run, self.limits.watch_timeout())
            .await
            .map_err(CiError::Host)
    }

    async fn apply_fix(&self, state: &mut GraphState, logs: &str, attempt: u32) -> anyhow::Result<()> {
        let prompt = ci_fix_prompt(state, logs, attempt, self.limits.max_attempts);
        self.fixer.execute(&prompt, &self.options).await?;
        let message = format!("fix: repair CI (attempt {})", attempt);
        let sha = self.host.commit_all(&state.worktree_path, &message).await?;
        state.commit_hash = Some(sha);
        self.host.push_branch(&state.worktree_path, &state.branch).await?;
        Ok(())
    }

    async fn set_ci_status(&self, state: &mut GraphState, status: CiStatus) {
        state.ci_status = Some(status);
        if let (Some(url), Some(number)) = (&state.pr_url, state.pr_number) {
            let pr = PrSummary {
                url: url.clone(),
                number,
                status: PrStatus::Open,
                ci_status: Some(status),
            };
            if let Err(e) = self.reporter.pr_updated(&pr).await {
                warn!(error = %e, "failed to record PR CI status");
            }
        }
    }
}
