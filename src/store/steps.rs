use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::params;
use shipyard_common::{ExecutionStep, StepStatus};

use super::ShipyardDb;
use crate::util::now_rfc3339;

impl ShipyardDb {
    pub fn insert_step(
        &self,
        run_id: &str,
        parent_id: Option<i64>,
        name: &str,
        detail: Option<&str>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO execution_steps (run_id, parent_id, name, status, started_at, detail)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
                params![run_id, parent_id, name, now_rfc3339(), detail],
            )
            .context("Failed to insert execution step")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record a step that starts and finishes at once.
    pub fn insert_event_step(
        &self,
        run_id: &str,
        name: &str,
        status: StepStatus,
        detail: Option<&str>,
    ) -> Result<i64> {
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO execution_steps (run_id, name, status, started_at, finished_at, detail)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
                params![run_id, name, status.as_str(), now, detail],
            )
            .context("Failed to insert execution event")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_step(&self, id: i64, status: StepStatus, detail: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE execution_steps SET status = ?1, finished_at = ?2, detail = COALESCE(?3, detail)
                 WHERE id = ?4",
                params![status.as_str(), now_rfc3339(), detail, id],
            )
            .context("Failed to finish execution step")?;
        Ok(())
    }

    /// Steps of one run, oldest first.
    pub fn list_steps(&self, run_id: &str) -> Result<Vec<ExecutionStep>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, run_id, parent_id, name, status, started_at, finished_at, detail
                 FROM execution_steps WHERE run_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_steps")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .context("Failed to query execution steps")?;
        let mut steps = Vec::new();
        for row in rows {
            let (id, run_id, parent_id, name, status, started_at, finished_at, detail) =
                row.context("Failed to read execution step row")?;
            let status = StepStatus::from_str(&status)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse step status")?;
            steps.push(ExecutionStep {
                id,
                run_id,
                parent_id,
                name,
                status,
                started_at,
                finished_at,
                detail,
            });
        }
        Ok(steps)
    }

    /// Count steps with `name` for a run.
    pub fn count_steps_named(&self, run_id: &str, name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM execution_steps WHERE run_id = ?1 AND name = ?2",
                params![run_id, name],
                |row| row.get(0),
            )
            .context("Failed to count execution steps")
    }
}
