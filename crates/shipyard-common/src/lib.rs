//! Shared domain types for Shipyard.
//!
//! - `feature`: features, their SDLC lifecycle and pull-request summary
//! - `run`: agent runs, run status and approval gates
//! - `ci`: CI fix attempt records
//! - `step`: execution step log rows

pub mod ci;
pub mod feature;
pub mod run;
pub mod step;

pub use ci::{CiFixOutcome, CiFixRecord};
pub use feature::{CiStatus, Feature, PrStatus, PrSummary, SdlcLifecycle};
pub use run::{AgentRun, AgentRunStatus, ApprovalGates};
pub use step::{ExecutionStep, StepStatus};
