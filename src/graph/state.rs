use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shipyard_common::{AgentRun, ApprovalGates, CiFixRecord, CiStatus, Feature};

use crate::phase::Phase;
use crate::spec_dir::Artifact;

/// A human decision delivered to the phase waiting for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumeSignal {
    Approved,
    Rejected { feedback: String },
}

/// Every channel threaded through the graph. Serialized whole into the
/// checkpoint store after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    pub feature_id: String,
    pub run_id: String,
    pub feature_name: String,
    pub description: String,
    pub repository_path: PathBuf,
    pub worktree_path: PathBuf,
    pub spec_dir: PathBuf,

    pub current_node: Option<Phase>,
    #[serde(default)]
    pub completed_phases: Vec<Phase>,
    /// The phase that suspended the run, if any. At most one.
    pub awaiting_approval: Option<Phase>,
    pub error: Option<String>,
    pub approval_gates: Option<ApprovalGates>,
    #[serde(default)]
    pub messages: Vec<String>,

    #[serde(default)]
    pub validation_retries: u32,
    #[serde(default)]
    pub last_validation_errors: Vec<String>,
    pub last_validation_target: Option<Artifact>,

    pub session_id: Option<String>,

    pub branch: String,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub open_pr: bool,
    pub commit_hash: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub ci_status: Option<CiStatus>,
    #[serde(default)]
    pub ci_fix_attempts: u32,
    #[serde(default)]
    pub ci_fix_history: Vec<CiFixRecord>,

    /// Resume value for this invocation; consumed by the waiting phase.
    pub pending_resume: Option<ResumeSignal>,
    pub rejection_feedback: Option<String>,
    #[serde(default)]
    pub needs_reexecution: bool,
}

impl GraphState {
    /// Fresh state for a feature's first run on a thread.
    pub fn for_feature(feature: &Feature, run: &AgentRun, spec_dir: PathBuf) -> Self {
        let repository_path = PathBuf::from(&feature.repository_path);
        Self {
            feature_id: feature.id.clone(),
            run_id: run.id.clone(),
            feature_name: feature.name.clone(),
            description: feature.description.clone(),
            worktree_path: repository_path.clone(),
            repository_path,
            spec_dir,
            current_node: None,
            completed_phases: Vec::new(),
            awaiting_approval: None,
            error: None,
            approval_gates: run.approval_gates,
            messages: Vec::new(),
            validation_retries: 0,
            last_validation_errors: Vec::new(),
            last_validation_target: None,
            session_id: run.session_id.clone(),
            branch: feature.branch.clone(),
            push: feature.push,
            open_pr: feature.open_pr,
            commit_hash: None,
            pr_url: None,
            pr_number: None,
            ci_status: None,
            ci_fix_attempts: 0,
            ci_fix_history: Vec::new(),
            pending_resume: None,
            rejection_feedback: None,
            needs_reexecution: false,
        }
    }

    pub fn is_completed(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn mark_completed(&mut self, phase: Phase) {
        if !self.is_completed(phase) {
            self.completed_phases.push(phase);
        }
    }

    pub fn push_message(&mut self, phase: Phase, text: impl AsRef<str>) {
        self.messages
            .push(format!("[{}] {}", phase, text.as_ref().trim()));
    }

    /// Success resets the validation counter and clears recorded errors.
    pub fn record_validation_success(&mut self) {
        self.validation_retries = 0;
        self.last_validation_errors.clear();
        self.last_validation_target = None;
    }

    /// Each failure increments the counter by exactly one.
    pub fn record_validation_failure(&mut self, target: Artifact, errors: Vec<String>) {
        self.validation_retries += 1;
        self.last_validation_errors = errors;
        self.last_validation_target = Some(target);
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> GraphState {
    GraphState {
        feature_id: "feat-1".into(),
        run_id: "run-1".into(),
        feature_name: "Login".into(),
        description: "Add a login page".into(),
        repository_path: PathBuf::from("/tmp/repo"),
        worktree_path: PathBuf::from("/tmp/repo"),
        spec_dir: PathBuf::from("/tmp/spec"),
        current_node: None,
        completed_phases: Vec::new(),
        awaiting_approval: None,
        error: None,
        approval_gates: None,
        messages: Vec::new(),
        validation_retries: 0,
        last_validation_errors: Vec::new(),
        last_validation_target: None,
        session_id: None,
        branch: "feat/login".into(),
        push: false,
        open_pr: false,
        commit_hash: None,
        pr_url: None,
        pr_number: None,
        ci_status: None,
        ci_fix_attempts: 0,
        ci_fix_history: Vec::new(),
        pending_resume: None,
        rejection_feedback: None,
        needs_reexecution: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_counter_resets_and_increments_by_one() {
        let mut state = test_state();
        state.record_validation_failure(Artifact::Plan, vec!["missing phases".into()]);
        state.record_validation_failure(Artifact::Plan, vec!["missing phases".into()]);
        assert_eq!(state.validation_retries, 2);
        assert_eq!(state.last_validation_target, Some(Artifact::Plan));
        state.record_validation_success();
        assert_eq!(state.validation_retries, 0);
        assert!(state.last_validation_errors.is_empty());
        assert!(state.last_validation_target.is_none());
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let mut state = test_state();
        state.mark_completed(Phase::Analyze);
        state.mark_completed(Phase::Analyze);
        assert_eq!(state.completed_phases, vec![Phase::Analyze]);
    }

    #[test]
    fn test_state_survives_json_checkpoint() {
        let mut state = test_state();
        state.awaiting_approval = Some(Phase::Requirements);
        state.pending_resume = Some(ResumeSignal::Rejected {
            feedback: "narrow scope".into(),
        });
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["awaitingApproval"], "requirements");
        assert_eq!(value["pendingResume"]["action"], "rejected");
        let back: GraphState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
