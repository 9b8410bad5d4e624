//! The fixed phase sequence every feature moves through.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shipyard_common::SdlcLifecycle;

use crate::spec_dir::Artifact;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyze,
    Requirements,
    Research,
    Plan,
    Implement,
    Merge,
}

impl Phase {
    /// Execution order.
    pub const ALL: [Phase; 6] = [
        Phase::Analyze,
        Phase::Requirements,
        Phase::Research,
        Phase::Plan,
        Phase::Implement,
        Phase::Merge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Requirements => "requirements",
            Self::Research => "research",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Merge => "merge",
        }
    }

    pub fn next(&self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Lifecycle value the feature takes while this phase runs.
    pub fn lifecycle(&self) -> SdlcLifecycle {
        match self {
            Self::Analyze => SdlcLifecycle::Analyze,
            Self::Requirements => SdlcLifecycle::Requirements,
            Self::Research => SdlcLifecycle::Research,
            Self::Plan => SdlcLifecycle::Planning,
            Self::Implement => SdlcLifecycle::Implementation,
            Self::Merge => SdlcLifecycle::Review,
        }
    }

    /// Spec-directory files this phase writes and that must pass validation.
    pub fn artifacts(&self) -> &'static [Artifact] {
        match self {
            Self::Analyze | Self::Requirements => &[Artifact::Spec],
            Self::Research => &[Artifact::Research],
            Self::Plan => &[Artifact::Plan, Artifact::Tasks],
            Self::Implement | Self::Merge => &[],
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Self::Analyze),
            "requirements" => Ok(Self::Requirements),
            "research" => Ok(Self::Research),
            "plan" => Ok(Self::Plan),
            "implement" => Ok(Self::Implement),
            "merge" => Ok(Self::Merge),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
