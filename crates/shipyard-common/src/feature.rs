use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Position of a feature in the delivery lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SdlcLifecycle {
    Started,
    Analyze,
    Requirements,
    Research,
    Planning,
    Implementation,
    Review,
    Blocked,
    Maintain,
}

impl SdlcLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Analyze => "analyze",
            Self::Requirements => "requirements",
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Blocked => "blocked",
            Self::Maintain => "maintain",
        }
    }

    /// True once implementation has been reached. Children blocked on this
    /// feature may start from here on.
    pub fn is_post_implementation(&self) -> bool {
        matches!(self, Self::Implementation | Self::Review | Self::Maintain)
    }
}

impl FromStr for SdlcLifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "analyze" => Ok(Self::Analyze),
            "requirements" => Ok(Self::Requirements),
            "research" => Ok(Self::Research),
            "planning" => Ok(Self::Planning),
            "implementation" => Ok(Self::Implementation),
            "review" => Ok(Self::Review),
            "blocked" => Ok(Self::Blocked),
            "maintain" => Ok(Self::Maintain),
            _ => Err(format!("Invalid lifecycle: {}", s)),
        }
    }
}

impl fmt::Display for SdlcLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Success,
    Failure,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrSummary {
    pub url: String,
    pub number: u64,
    pub status: PrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<CiStatus>,
}

/// A unit of work tracked through the SDLC lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub repository_path: String,
    pub branch: String,
    pub lifecycle: SdlcLifecycle,
    pub parent_id: Option<String>,
    pub agent_run_id: Option<String>,
    pub spec_path: Option<String>,
    pub push: bool,
    pub open_pr: bool,
    pub pr: Option<PrSummary>,
    pub created_at: String,
    pub updated_at: String,
}

impl Feature {
    pub fn is_blocked(&self) -> bool {
        self.lifecycle == SdlcLifecycle::Blocked
    }
}
