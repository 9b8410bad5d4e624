//! Dependent-feature unblocking.
//!
//! A feature created with a parent that has not reached implementation waits
//! in `Blocked` with its run provisioned. Once the parent's lifecycle moves
//! past implementation, each blocked direct child is released and its worker
//! spawned.

use anyhow::{Context, Result};
use shipyard_common::{Feature, SdlcLifecycle};
use tracing::{info, warn};

use crate::lifecycle::spawn_worker;
use crate::process::{ProcessControl, WorkerSpec};
use crate::store::DbHandle;

/// Set a feature's lifecycle, then release its blocked children when the new
/// value is post-implementation.
pub async fn advance_lifecycle(
    db: &DbHandle,
    process: &dyn ProcessControl,
    feature_id: &str,
    lifecycle: SdlcLifecycle,
) -> Result<Feature> {
    let id = feature_id.to_string();
    let feature = db.call(move |db| db.set_lifecycle(&id, lifecycle)).await?;
    if lifecycle.is_post_implementation() {
        unblock_children(db, process, &feature.id).await?;
    }
    Ok(feature)
}

/// Release the blocked direct children of `parent_id`. Returns the ids of
/// children moved to `Started`. Running it again is a no-op.
pub async fn unblock_children(
    db: &DbHandle,
    process: &dyn ProcessControl,
    parent_id: &str,
) -> Result<Vec<String>> {
    let id = parent_id.to_string();
    let parent = db
        .call(move |db| db.get_feature(&id))
        .await?
        .with_context(|| format!("Feature {} not found", parent_id))?;
    if !parent.lifecycle.is_post_implementation() {
        return Ok(Vec::new());
    }

    let id = parent_id.to_string();
    let children = db.call(move |db| db.list_children(&id)).await?;
    let mut released = Vec::new();
    for child in children.into_iter().filter(Feature::is_blocked) {
        let child_id = child.id.clone();
        let won = db.call(move |db| db.unblock_feature(&child_id)).await?;
        if !won {
            continue;
        }
        info!(feature = %child.slug, parent = %parent.slug, "dependency satisfied, starting feature");
        released.push(child.id.clone());

        let (Some(run_id), Some(_)) = (&child.agent_run_id, &child.spec_path) else {
            warn!(
                feature = %child.slug,
                "unblocked feature has no provisioned run or spec directory, not spawning"
            );
            continue;
        };
        if let Err(e) = spawn_worker(db, process, WorkerSpec::start(run_id)).await {
            warn!(feature = %child.slug, error = %e, "failed to spawn unblocked feature");
        }
    }
    Ok(released)
}
