//! Orchestration graph.
//!
//! | Module       | Contents                                                  |
//! |--------------|-----------------------------------------------------------|
//! | `state`      | `GraphState` checkpointed after every step, resume signals |
//! | `node`       | Phase entry (approve/reject handling) and agent execution  |
//! | `validation` | Artifact schema checks and the repair route                |
//! | `merge`      | Commit, push, pull request                                 |
//! | `ci`         | Bounded CI watch/fix loop                                  |
//! | `host`       | `RepoHost` trait over git and the GitHub CLI               |
//! | `prompts`    | Prompt builders                                            |
//! | `report`     | `RunReporter` side-effect seam                             |
//!
//! [`OrchestrationGraph::invoke`] walks [`Phase::ALL`] in order. Each phase
//! runs at most once per invocation and the graph suspends at most once,
//! at the first gated phase boundary. A later invocation with the same thread
//! id picks up from the checkpoint and consumes exactly one resume value.

pub mod ci;
pub mod host;
pub mod merge;
pub mod node;
pub mod prompts;
pub mod report;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{CiSection, ShipyardConfig};
use crate::errors::GraphError;
use crate::executor::AgentExecutor;
use crate::gates::should_interrupt;
use crate::phase::Phase;

use merge::MergeNode;
use node::{NodeEntry, PhaseNode};
use report::RunReporter;
pub use state::{GraphState, ResumeSignal};

/// Limits and switches the graph reads from configuration.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub max_validation_retries: u32,
    pub ci: CiSection,
    pub agent_timeout: Duration,
    pub session_continuity: bool,
}

impl GraphConfig {
    pub fn from_config(config: &ShipyardConfig) -> Self {
        Self {
            max_validation_retries: config.toml.validation.max_retries,
            ci: config.toml.ci.clone(),
            agent_timeout: config.agent_timeout(),
            session_continuity: config.toml.agent.session_continuity,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_validation_retries: 3,
            ci: CiSection::default(),
            agent_timeout: Duration::from_secs(3600),
            session_continuity: true,
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOutcome {
    Completed { pr_url: Option<String> },
    /// Suspended after `phase`, waiting for approve or reject.
    Interrupted { phase: Phase },
}

pub struct OrchestrationGraph {
    executor: Arc<dyn AgentExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    host: Arc<dyn host::RepoHost>,
    reporter: Arc<dyn RunReporter>,
    config: GraphConfig,
}

impl OrchestrationGraph {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        host: Arc<dyn host::RepoHost>,
        reporter: Arc<dyn RunReporter>,
        config: GraphConfig,
    ) -> Self {
        Self {
            executor,
            checkpoints,
            host,
            reporter,
            config,
        }
    }

    /// Run the graph for `thread_id`. `initial` seeds a fresh thread; for an
    /// existing checkpoint only its run id and approval gates are taken.
    pub async fn invoke(
        &self,
        thread_id: &str,
        initial: GraphState,
        signal: Option<ResumeSignal>,
    ) -> Result<GraphOutcome, GraphError> {
        let mut state = match self.load(thread_id).await? {
            Some(mut saved) => {
                info!(thread_id, run_id = %initial.run_id, "resuming from checkpoint");
                saved.run_id = initial.run_id;
                saved.approval_gates = initial.approval_gates;
                saved
            }
            None => initial,
        };
        state.error = None;
        match (signal, state.awaiting_approval) {
            (Some(signal), Some(_)) => state.pending_resume = Some(signal),
            (Some(signal), None) => {
                warn!(?signal, "no phase is waiting for approval, ignoring resume signal");
            }
            (None, _) => {}
        }

        let result = self.run_phases(thread_id, &mut state).await;
        if let Err(e) = &result {
            state.error = Some(e.to_string());
            if let Err(save_err) = self.save(thread_id, &state).await {
                warn!(error = %save_err, "failed to checkpoint failed state");
            }
        }
        result
    }

    async fn run_phases(
        &self,
        thread_id: &str,
        state: &mut GraphState,
    ) -> Result<GraphOutcome, GraphError> {
        let phase_node = PhaseNode {
            executor: self.executor.as_ref(),
            reporter: self.reporter.as_ref(),
            config: &self.config,
        };

        for phase in Phase::ALL {
            match node::enter(state, phase) {
                NodeEntry::Skip => continue,
                NodeEntry::Suspended => {
                    info!(%phase, "still waiting for approval");
                    self.save(thread_id, state).await?;
                    return Ok(GraphOutcome::Interrupted { phase });
                }
                NodeEntry::Approved => {
                    self.save(thread_id, state).await?;
                    continue;
                }
                NodeEntry::Execute => {}
            }

            state.current_node = Some(phase);
            self.reporter.phase_started(phase).await?;
            self.save(thread_id, state).await?;

            if phase == Phase::Merge {
                let merge = MergeNode {
                    host: self.host.as_ref(),
                    fixer: self.executor.as_ref(),
                    reporter: self.reporter.as_ref(),
                    config: &self.config,
                    options: phase_node.options(state),
                };
                merge.execute(state).await?;
            } else {
                phase_node.execute(state, phase).await?;
            }

            state.mark_completed(phase);
            self.reporter.phase_finished(phase, "completed").await?;
            info!(%phase, "phase completed");

            if should_interrupt(phase, state.approval_gates.as_ref()) {
                info!(%phase, "approval gate reached, suspending");
                state.awaiting_approval = Some(phase);
                self.save(thread_id, state).await?;
                return Ok(GraphOutcome::Interrupted { phase });
            }
            self.save(thread_id, state).await?;
        }

        state.current_node = None;
        self.save(thread_id, state).await?;
        Ok(GraphOutcome::Completed {
            pr_url: state.pr_url.clone(),
        })
    }

    /// Checkpointed state for `thread_id`, if any.
    pub async fn load(&self, thread_id: &str) -> Result<Option<GraphState>, GraphError> {
        let Some(value) = self
            .checkpoints
            .get(thread_id)
            .await
            .map_err(GraphError::Checkpoint)?
        else {
            return Ok(None);
        };
        let state = serde_json::from_value(value)
            .context("Checkpoint does not match graph state")
            .map_err(GraphError::Checkpoint)?;
        Ok(Some(state))
    }

    async fn save(&self, thread_id: &str, state: &GraphState) -> Result<(), GraphError> {
        let value = serde_json::to_value(state)
            .context("Failed to serialize graph state")
            .map_err(GraphError::Checkpoint)?;
        self.checkpoints
            .put(thread_id, &value)
            .await
            .map_err(GraphError::Checkpoint)
    }
}
