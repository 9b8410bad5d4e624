//! Durable graph state keyed by thread id.
//!
//! The graph only sees the [`CheckpointStore`] trait. The SQLite store is used
//! by worker processes; the in-memory store backs tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::store::DbHandle;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Value>>;
    async fn put(&self, thread_id: &str, state: &Value) -> Result<()>;
}

pub struct SqliteCheckpointStore {
    db: DbHandle,
}

impl SqliteCheckpointStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Value>> {
        let thread_id = thread_id.to_string();
        let raw = self
            .db
            .call(move |db| db.get_checkpoint(&thread_id))
            .await?;
        raw.map(|s| serde_json::from_str(&s).context("Failed to parse checkpoint JSON"))
            .transpose()
    }

    async fn put(&self, thread_id: &str, state: &Value) -> Result<()> {
        let thread_id = thread_id.to_string();
        let json = serde_json::to_string(state).context("Failed to serialize checkpoint")?;
        self.db
            .call(move |db| db.put_checkpoint(&thread_id, &json))
            .await
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("checkpoint lock poisoned: {}", e))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, state: &Value) -> Result<()> {
        self.lock()?.insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}
