use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiFixOutcome {
    Fixed,
    Failed,
    Timeout,
}

impl fmt::Display for CiFixOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fixed => "fixed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// One attempt of the CI watch/fix loop. Records are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CiFixRecord {
    pub attempt: u32,
    pub started_at: String,
    pub failure_logs: String,
    pub outcome: CiFixOutcome,
}
