use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use super::ShipyardDb;
use crate::util::now_rfc3339;

impl ShipyardDb {
    pub fn get_checkpoint(&self, thread_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT state FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read checkpoint")
    }

    pub fn put_checkpoint(&self, thread_id: &str, state: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO checkpoints (thread_id, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(thread_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                params![thread_id, state, now_rfc3339()],
            )
            .context("Failed to write checkpoint")?;
        Ok(())
    }
}
