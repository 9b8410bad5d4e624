//! Execution step log: the worker writes flat rows, readers assemble them
//! into a tree with durations.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::DateTime;
use serde::Serialize;
use shipyard_common::{ExecutionStep, StepStatus};
use tracing::warn;

use crate::store::DbHandle;

/// A step with its nested steps and elapsed time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNode {
    #[serde(flatten)]
    pub step: ExecutionStep,
    /// `None` while the step is still running.
    pub duration_ms: Option<i64>,
    pub children: Vec<StepNode>,
}

fn duration_ms(step: &ExecutionStep) -> Option<i64> {
    let finished = step.finished_at.as_deref()?;
    let start = DateTime::parse_from_rfc3339(&step.started_at).ok()?;
    let end = DateTime::parse_from_rfc3339(finished).ok()?;
    Some((end - start).num_milliseconds().max(0))
}

/// Assemble flat rows (oldest first) into a forest. Rows whose parent is
/// missing become roots.
pub fn build_tree(steps: Vec<ExecutionStep>) -> Vec<StepNode> {
    let ids: Vec<i64> = steps.iter().map(|s| s.id).collect();
    let mut children: HashMap<i64, Vec<ExecutionStep>> = HashMap::new();
    let mut roots = Vec::new();
    for step in steps {
        match step.parent_id {
            Some(parent) if ids.contains(&parent) => children.entry(parent).or_default().push(step),
            _ => roots.push(step),
        }
    }
    roots
        .into_iter()
        .map(|step| attach(step, &mut children))
        .collect()
}

fn attach(step: ExecutionStep, children: &mut HashMap<i64, Vec<ExecutionStep>>) -> StepNode {
    let kids = children.remove(&step.id).unwrap_or_default();
    StepNode {
        duration_ms: duration_ms(&step),
        children: kids.into_iter().map(|c| attach(c, children)).collect(),
        step,
    }
}

/// Human-readable duration, e.g. `850ms`, `12.3s`, `4m 05s`.
pub fn format_duration(ms: i64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

/// Writes phase steps for one run and nests events under the open phase.
pub struct StepRecorder {
    db: DbHandle,
    run_id: String,
    current: Mutex<Option<i64>>,
}

impl StepRecorder {
    pub fn new(db: DbHandle, run_id: &str) -> Self {
        Self {
            db,
            run_id: run_id.to_string(),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<i64> {
        self.current.lock().ok().and_then(|c| *c)
    }

    fn set_current(&self, id: Option<i64>) {
        if let Ok(mut current) = self.current.lock() {
            *current = id;
        }
    }

    pub async fn begin(&self, name: &str) {
        let (run_id, name) = (self.run_id.clone(), name.to_string());
        match self
            .db
            .call(move |db| db.insert_step(&run_id, None, &name, None))
            .await
        {
            Ok(id) => self.set_current(Some(id)),
            Err(e) => warn!(error = %e, "failed to record step start"),
        }
    }

    pub async fn end(&self, status: StepStatus, detail: Option<&str>) {
        let Some(id) = self.current() else {
            return;
        };
        self.set_current(None);
        let detail = detail.map(str::to_string);
        if let Err(e) = self
            .db
            .call(move |db| db.finish_step(id, status, detail.as_deref()))
            .await
        {
            warn!(error = %e, "failed to record step end");
        }
    }

    /// Instant event, nested under the open step when there is one.
    pub async fn event(&self, name: &str, status: StepStatus, detail: Option<&str>) {
        let parent = self.current();
        let (run_id, name) = (self.run_id.clone(), name.to_string());
        let detail = detail.map(str::to_string);
        let result = self
            .db
            .call(move |db| {
                let id = db.insert_step(&run_id, parent, &name, detail.as_deref())?;
                db.finish_step(id, status, None)?;
                Ok(id)
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to record step event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ShipyardDb;

    fn step(id: i64, parent_id: Option<i64>, started: &str, finished: Option<&str>) -> ExecutionStep {
        ExecutionStep {
            id,
            run_id: "r".into(),
            parent_id,
            name: format!("s{}", id),
            status: if finished.is_some() {
                StepStatus::Completed
            } else {
                StepStatus::Running
            },
            started_at: started.into(),
            finished_at: finished.map(str::to_string),
            detail: None,
        }
    }

    #[test]
    fn test_build_tree_nests_and_times() {
        let tree = build_tree(vec![
            step(1, None, "2026-01-01T00:00:00.000Z", Some("2026-01-01T00:01:30.000Z")),
            step(2, Some(1), "2026-01-01T00:00:10.000Z", Some("2026-01-01T00:00:10.250Z")),
            step(3, None, "2026-01-01T00:01:30.000Z", None),
            step(4, Some(99), "2026-01-01T00:02:00.000Z", None),
        ]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[0].duration_ms, Some(90_000));
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].duration_ms, Some(250));
        assert_eq!(tree[1].duration_ms, None);
        assert_eq!(tree[2].step.id, 4);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(12_340), "12.3s");
        assert_eq!(format_duration(245_000), "4m 05s");
    }

    #[tokio::test]
    async fn test_recorder_nests_events_under_open_step() {
        let db = DbHandle::new(ShipyardDb::new_in_memory().unwrap());
        let feature = {
            let guard = db.lock_sync().unwrap();
            crate::store::test_support::feature(&guard, "Login").unwrap()
        };
        let run = {
            let guard = db.lock_sync().unwrap();
            guard
                .insert_run(&crate::store::NewRun {
                    feature_id: feature.id.clone(),
                    thread_id: "t".into(),
                    agent_kind: "codex".into(),
                    approval_gates: None,
                    session_id: None,
                })
                .unwrap()
        };

        let recorder = StepRecorder::new(db.clone(), &run.id);
        recorder.begin("phase:analyze").await;
        recorder
            .event("validation_failed", StepStatus::Failed, Some("missing summary"))
            .await;
        recorder.end(StepStatus::Completed, None).await;
        recorder.event("approved", StepStatus::Completed, None).await;

        let steps = db.lock_sync().unwrap().list_steps(&run.id).unwrap();
        let tree = build_tree(steps);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].step.name, "phase:analyze");
        assert_eq!(tree[0].step.status, StepStatus::Completed);
        assert_eq!(tree[0].children[0].step.name, "validation_failed");
        assert_eq!(tree[0].children[0].step.status, StepStatus::Failed);
        assert_eq!(tree[1].step.name, "approved");
    }
}
