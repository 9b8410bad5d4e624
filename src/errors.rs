//! Typed error hierarchy for Shipyard.
//!
//! - `ExecutorError`: agent subprocess failures
//! - `CiError`: CI watch/fix loop terminal conditions
//! - `ToolError`: `git`/`gh` invocations that exceeded their deadline
//! - `GraphError`: orchestration graph failures (recorded as the run's error)
//! - `LifecycleError`: rejected run lifecycle operations, shown to the user as-is

use shipyard_common::{AgentRunStatus, CiFixRecord};
use thiserror::Error;

use crate::phase::Phase;

/// Errors from an agent executor invocation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to spawn agent command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Agent exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Agent reported an error: {0}")]
    Agent(String),

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A host tool (`git`, `gh`) that did not finish in time. The process is
/// killed before this is returned.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
}

/// Terminal conditions of the CI watch/fix loop. Each carries the full
/// attempt history.
#[derive(Debug, Error)]
pub enum CiError {
    #[error("CI watch timed out after {} fix attempt(s)", attempts(history))]
    Timeout { history: Vec<CiFixRecord> },

    #[error("CI still failing after {} fix attempt(s)", attempts(history))]
    Exhausted { history: Vec<CiFixRecord> },

    #[error("CI host error: {0}")]
    Host(#[source] anyhow::Error),
}

fn attempts(history: &[CiFixRecord]) -> u32 {
    history.iter().map(|r| r.attempt).max().unwrap_or(0)
}

impl CiError {
    pub fn history(&self) -> &[CiFixRecord] {
        match self {
            Self::Timeout { history } | Self::Exhausted { history } => history,
            Self::Host(_) => &[],
        }
    }
}

/// Errors that stop a graph invocation. The worker records these as the
/// run's error and moves the run to `failed`.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Agent failed during {phase} phase: {source}")]
    Agent {
        phase: Phase,
        #[source]
        source: ExecutorError,
    },

    #[error("{phase} artifacts failed validation {retries} times: {}", errors.join("; "))]
    ValidationExhausted {
        phase: Phase,
        retries: u32,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Ci(#[from] CiError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reasons a lifecycle operation was refused. No state is mutated when one
/// of these is returned.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Feature {id} not found")]
    FeatureNotFound { id: String },

    #[error("Agent run {id} not found")]
    RunNotFound { id: String },

    #[error("Feature {feature_id} has no agent run")]
    NoRun { feature_id: String },

    #[error("Agent is still running; stop it first before resuming")]
    StillRunning { run_id: String },

    #[error(
        "Feature {feature_id} is blocked until its parent reaches implementation; it starts on its own then"
    )]
    Blocked { feature_id: String },

    #[error("Agent run already completed; nothing to resume")]
    AlreadyCompleted { run_id: String },

    #[error("Agent run is {status}; only interrupted, failed or waiting runs can be resumed")]
    NotResumable { status: AgentRunStatus },

    #[error("Agent run is {status}, not waiting for approval")]
    NotWaitingApproval { status: AgentRunStatus },

    #[error("Agent run is already {status}; nothing to stop")]
    AlreadyFinished { status: AgentRunStatus },

    #[error("Feature {feature_id} already has an active run ({run_id})")]
    AlreadyActive { feature_id: String, run_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_common::CiFixOutcome;

    fn record(attempt: u32, outcome: CiFixOutcome) -> CiFixRecord {
        CiFixRecord {
            attempt,
            started_at: "2026-01-01T00:00:00Z".into(),
            failure_logs: String::new(),
            outcome,
        }
    }

    #[test]
    fn executor_error_spawn_carries_command() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "claude not found");
        let err = ExecutorError::Spawn {
            command: "claude".into(),
            source: io_err,
        };
        match &err {
            ExecutorError::Spawn { command, source } => {
                assert_eq!(command, "claude");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Spawn"),
        }
    }

    #[test]
    fn ci_error_exhausted_reports_attempts() {
        let err = CiError::Exhausted {
            history: vec![
                record(1, CiFixOutcome::Failed),
                record(2, CiFixOutcome::Failed),
                record(3, CiFixOutcome::Failed),
            ],
        };
        assert_eq!(err.to_string(), "CI still failing after 3 fix attempt(s)");
        assert_eq!(err.history().len(), 3);
    }

    #[test]
    fn ci_error_converts_into_graph_error() {
        let err: GraphError = CiError::Timeout {
            history: vec![record(0, CiFixOutcome::Timeout)],
        }
        .into();
        match &err {
            GraphError::Ci(CiError::Timeout { history }) => assert_eq!(history.len(), 1),
            _ => panic!("Expected GraphError::Ci(Timeout)"),
        }
    }

    #[test]
    fn still_running_message_is_specific() {
        let err = LifecycleError::StillRunning {
            run_id: "r1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Agent is still running; stop it first before resuming"
        );
    }

    #[test]
    fn validation_exhausted_lists_errors() {
        let err = GraphError::ValidationExhausted {
            phase: Phase::Plan,
            retries: 3,
            errors: vec!["missing phases".into(), "bad id".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("plan"));
        assert!(msg.contains("missing phases; bad id"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ExecutorError::Timeout { seconds: 1 });
        assert_std_error(&CiError::Exhausted { history: vec![] });
        assert_std_error(&GraphError::Other(anyhow::anyhow!("x")));
        assert_std_error(&LifecycleError::NoRun {
            feature_id: "f".into(),
        });
    }
}
