//! Side effects the graph reports outward while it runs.

use anyhow::Result;
use async_trait::async_trait;
use shipyard_common::PrSummary;

use crate::phase::Phase;

/// Receives progress from the graph. The worker's implementation writes
/// execution steps, advances the feature lifecycle and unblocks children.
#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn phase_started(&self, phase: Phase) -> Result<()>;

    async fn phase_finished(&self, phase: Phase, detail: &str) -> Result<()>;

    async fn session_updated(&self, session_id: &str) -> Result<()>;

    async fn pr_updated(&self, pr: &PrSummary) -> Result<()>;

    /// A free-form event such as a validation failure or CI fix attempt.
    async fn event(&self, name: &str, detail: &str) -> Result<()>;
}

/// Discards everything.
pub struct NullReporter;

#[async_trait]
impl RunReporter for NullReporter {
    async fn phase_started(&self, _phase: Phase) -> Result<()> {
        Ok(())
    }

    async fn phase_finished(&self, _phase: Phase, _detail: &str) -> Result<()> {
        Ok(())
    }

    async fn session_updated(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn pr_updated(&self, _pr: &PrSummary) -> Result<()> {
        Ok(())
    }

    async fn event(&self, _name: &str, _detail: &str) -> Result<()> {
        Ok(())
    }
}
