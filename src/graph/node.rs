//! Phase node wrapper: resume-signal handling on entry, agent invocation
//! with session continuity, and the validation/repair loop.

use tracing::{info, warn};

use crate::errors::GraphError;
use crate::executor::{AgentExecutor, ExecuteOptions, ExecutorFeature};
use crate::phase::Phase;
use crate::util::truncate_tail;

use super::GraphConfig;
use super::prompts::{phase_prompt, repair_prompt};
use super::report::RunReporter;
use super::state::{GraphState, ResumeSignal};
use super::validation::{self, ValidationRoute};

/// Characters of each agent answer kept in `messages`.
const MESSAGE_CHARS: usize = 1_000;

/// What a phase does when the graph reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEntry {
    /// Already completed and not waiting on a decision.
    Skip,
    Execute,
    /// Waiting phase approved; continue without re-executing.
    Approved,
    /// Waiting phase with no decision delivered.
    Suspended,
}

/// Consume the pending resume value if this phase is the one waiting.
pub fn enter(state: &mut GraphState, phase: Phase) -> NodeEntry {
    if state.awaiting_approval == Some(phase) {
        return match state.pending_resume.take() {
            Some(ResumeSignal::Approved) => {
                info!(%phase, "phase approved");
                state.awaiting_approval = None;
                state.rejection_feedback = None;
                NodeEntry::Approved
            }
            Some(ResumeSignal::Rejected { feedback }) => {
                info!(%phase, "phase rejected, re-executing");
                state.awaiting_approval = None;
                state.completed_phases.retain(|p| *p != phase);
                state.rejection_feedback = Some(feedback);
                state.needs_reexecution = true;
                NodeEntry::Execute
            }
            None => NodeEntry::Suspended,
        };
    }
    if state.is_completed(phase) {
        NodeEntry::Skip
    } else {
        NodeEntry::Execute
    }
}

pub struct PhaseNode<'a> {
    pub executor: &'a dyn AgentExecutor,
    pub reporter: &'a dyn RunReporter,
    pub config: &'a GraphConfig,
}

impl PhaseNode<'_> {
    /// Executor options for the state's worktree, resuming the agent session
    /// when allowed and supported.
    pub fn options(&self, state: &GraphState) -> ExecuteOptions {
        let resume_session = if self.config.session_continuity
            && self.executor.supports_feature(ExecutorFeature::SessionResume)
        {
            state.session_id.clone()
        } else {
            None
        };
        ExecuteOptions {
            cwd: state.worktree_path.clone(),
            timeout: self.config.agent_timeout,
            resume_session,
            silent: false,
        }
    }

    async fn call_agent(
        &self,
        state: &mut GraphState,
        phase: Phase,
        prompt: &str,
    ) -> Result<(), GraphError> {
        let options = self.options(state);
        let result = self
            .executor
            .execute(prompt, &options)
            .await
            .map_err(|source| GraphError::Agent { phase, source })?;

        state.push_message(phase, truncate_tail(&result.result, MESSAGE_CHARS));
        if let Some(session_id) = result.session_id
            && state.session_id.as_deref() != Some(session_id.as_str())
        {
            if let Err(e) = self.reporter.session_updated(&session_id).await {
                warn!(error = %e, "failed to record session id");
            }
            state.session_id = Some(session_id);
        }
        Ok(())
    }

    /// Run the agent for `phase`, then validate its artifacts, repairing
    /// until they pass or retries run out.
    pub async fn execute(&self, state: &mut GraphState, phase: Phase) -> Result<(), GraphError> {
        let prompt = phase_prompt(state, phase);
        self.call_agent(state, phase, &prompt).await?;

        loop {
            match validation::check(state, phase, self.config.max_validation_retries)? {
                ValidationRoute::Proceed => break,
                ValidationRoute::Repair(artifact) => {
                    warn!(
                        %phase,
                        artifact = artifact.file_name(),
                        retries = state.validation_retries,
                        "artifact failed validation, repairing"
                    );
                    let detail = state.last_validation_errors.join("; ");
                    if let Err(e) = self.reporter.event("validation_failed", &detail).await {
                        warn!(error = %e, "failed to record validation failure");
                    }
                    let prompt = repair_prompt(state, phase, artifact);
                    self.call_agent(state, phase, &prompt).await?;
                }
                ValidationRoute::Fail => {
                    return Err(GraphError::ValidationExhausted {
                        phase,
                        retries: state.validation_retries,
                        errors: state.last_validation_errors.clone(),
                    });
                }
            }
        }

        state.rejection_feedback = None;
        state.needs_reexecution = false;
        Ok(())
    }
}
