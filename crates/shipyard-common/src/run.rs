use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of one execution attempt of the orchestration graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AgentRunStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

impl AgentRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waitingApproval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses a retry or resume may continue from.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Failed | Self::WaitingApproval)
    }

    /// A run in one of these statuses owns (or is about to own) a live process.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl FromStr for AgentRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waitingApproval" => Ok(Self::WaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "interrupted" => Ok(Self::Interrupted),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phase boundaries may be crossed without a human decision.
///
/// An absent `ApprovalGates` (i.e. `None` wherever it is optional) means the
/// run is fully autonomous.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGates {
    #[serde(default)]
    pub allow_prd: bool,
    #[serde(default)]
    pub allow_plan: bool,
    #[serde(default)]
    pub allow_merge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub feature_id: String,
    /// Checkpoint key, shared by every run continuing the same conversation.
    pub thread_id: String,
    pub agent_kind: String,
    pub status: AgentRunStatus,
    pub pid: Option<u32>,
    pub approval_gates: Option<ApprovalGates>,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}
