use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use shipyard_common::{AgentRun, AgentRunStatus, ApprovalGates};

use super::ShipyardDb;
use crate::util::now_rfc3339;

/// Fields supplied when a run is created. Runs always start `pending`.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub feature_id: String,
    pub thread_id: String,
    pub agent_kind: String,
    pub approval_gates: Option<ApprovalGates>,
    pub session_id: Option<String>,
}

const RUN_COLUMNS: &str = "id, feature_id, thread_id, agent_kind, status, pid, approval_gates, session_id, error, result, created_at, started_at, completed_at, updated_at";

impl ShipyardDb {
    /// Insert a `pending` run. Fails when the feature already has a pending
    /// or running run.
    pub fn insert_run(&self, new: &NewRun) -> Result<AgentRun> {
        let id = uuid::Uuid::new_v4().to_string();
        let gates = new
            .approval_gates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize approval gates")?;
        self.conn
            .execute(
                "INSERT INTO agent_runs (id, feature_id, thread_id, agent_kind, status, approval_gates, session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?7)",
                params![
                    id,
                    new.feature_id,
                    new.thread_id,
                    new.agent_kind,
                    gates,
                    new.session_id,
                    now_rfc3339()
                ],
            )
            .context("Failed to insert agent run")?;
        self.get_run(&id)?.context("Agent run not found after insert")
    }

    pub fn get_run(&self, id: &str) -> Result<Option<AgentRun>> {
        let sql = format!("SELECT {} FROM agent_runs WHERE id = ?1", RUN_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], RunRow::from_row)
            .optional()
            .context("Failed to query agent run")?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs_for_feature(&self, feature_id: &str) -> Result<Vec<AgentRun>> {
        self.query_runs(
            &format!(
                "SELECT {} FROM agent_runs WHERE feature_id = ?1 ORDER BY created_at",
                RUN_COLUMNS
            ),
            params![feature_id],
        )
    }

    /// All runs believed to own a process.
    pub fn list_active_runs(&self) -> Result<Vec<AgentRun>> {
        self.query_runs(
            &format!(
                "SELECT {} FROM agent_runs WHERE status IN ('pending', 'running') ORDER BY created_at",
                RUN_COLUMNS
            ),
            params![],
        )
    }

    pub fn active_run_for_feature(&self, feature_id: &str) -> Result<Option<AgentRun>> {
        let sql = format!(
            "SELECT {} FROM agent_runs WHERE feature_id = ?1 AND status IN ('pending', 'running') LIMIT 1",
            RUN_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![feature_id], RunRow::from_row)
            .optional()
            .context("Failed to query active run")?;
        row.map(RunRow::into_run).transpose()
    }

    fn query_runs(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<AgentRun>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare run query")?;
        let rows = stmt
            .query_map(args, RunRow::from_row)
            .context("Failed to query agent runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read agent run row")?.into_run()?);
        }
        Ok(runs)
    }

    /// Record the spawned worker's pid. A run the worker already settled (or
    /// one stopped in the meantime) keeps its cleared pid.
    pub fn set_run_pid(&self, id: &str, pid: u32) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET pid = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ('pending', 'running')",
                params![pid, now_rfc3339(), id],
            )
            .context("Failed to record run pid")?;
        Ok(changed == 1)
    }

    pub fn set_run_session(&self, id: &str, session_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE agent_runs SET session_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![session_id, now_rfc3339(), id],
            )
            .context("Failed to record run session")?;
        Ok(())
    }

    /// `pending` → `running`, claimed by the process with `pid`.
    pub fn mark_running(&self, id: &str, pid: u32) -> Result<bool> {
        let now = now_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET status = 'running', pid = ?1, error = NULL,
                    started_at = COALESCE(started_at, ?2), updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![pid, now, id],
            )
            .context("Failed to mark run running")?;
        Ok(changed == 1)
    }

    /// `waitingApproval` → `pending` so the same run can be re-spawned with a
    /// resume signal.
    pub fn requeue_waiting_run(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET status = 'pending', pid = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'waitingApproval'",
                params![now_rfc3339(), id],
            )
            .context("Failed to requeue run")?;
        Ok(changed == 1)
    }

    /// Mark a live or waiting run `interrupted` with `note`. Only one caller
    /// can win; the loser sees `false`.
    pub fn interrupt_run(&self, id: &str, note: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET status = 'interrupted', error = ?1, pid = NULL, updated_at = ?2
                 WHERE id = ?3 AND status IN ('pending', 'running', 'waitingApproval')",
                params![note, now_rfc3339(), id],
            )
            .context("Failed to interrupt run")?;
        Ok(changed == 1)
    }

    /// Crash reclassification: only a run still `pending`/`running` moves.
    pub fn interrupt_if_active(&self, id: &str, note: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET status = 'interrupted', error = ?1, pid = NULL, updated_at = ?2
                 WHERE id = ?3 AND status IN ('pending', 'running')",
                params![note, now_rfc3339(), id],
            )
            .context("Failed to reclassify run")?;
        Ok(changed == 1)
    }

    /// Settle a `running` run. A run that was stopped meanwhile is left alone.
    pub fn finish_run(
        &self,
        id: &str,
        status: AgentRunStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = now_rfc3339();
        let completed_at = status.is_terminal().then_some(now.as_str());
        let changed = self
            .conn
            .execute(
                "UPDATE agent_runs SET status = ?1, result = COALESCE(?2, result), error = ?3,
                    pid = NULL, completed_at = ?4, updated_at = ?5
                 WHERE id = ?6 AND status = 'running'",
                params![status.as_str(), result, error, completed_at, now, id],
            )
            .context("Failed to finish run")?;
        Ok(changed == 1)
    }
}

/// Intermediate row struct for agent_runs.
struct RunRow {
    id: String,
    feature_id: String,
    thread_id: String,
    agent_kind: String,
    status: String,
    pid: Option<u32>,
    approval_gates: Option<String>,
    session_id: Option<String>,
    error: Option<String>,
    result: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            feature_id: row.get(1)?,
            thread_id: row.get(2)?,
            agent_kind: row.get(3)?,
            status: row.get(4)?,
            pid: row.get(5)?,
            approval_gates: row.get(6)?,
            session_id: row.get(7)?,
            error: row.get(8)?,
            result: row.get(9)?,
            created_at: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_run(self) -> Result<AgentRun> {
        let status = AgentRunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse agent run status")?;
        let approval_gates = self
            .approval_gates
            .as_deref()
            .map(serde_json::from_str::<ApprovalGates>)
            .transpose()
            .context("Failed to parse approval gates JSON")?;
        Ok(AgentRun {
            id: self.id,
            feature_id: self.feature_id,
            thread_id: self.thread_id,
            agent_kind: self.agent_kind,
            status,
            pid: self.pid,
            approval_gates,
            session_id: self.session_id,
            error: self.error,
            result: self.result,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
        })
    }
}
