//! Agent executor capability.
//!
//! | Module   | Contents                                                      |
//! |----------|---------------------------------------------------------------|
//! | `stream` | Subprocess runner shared by all agents: NDJSON stdout, timeout |
//! | `claude` | Claude Code CLI (`stream-json` output, session resume)         |
//! | `codex`  | Codex CLI (`exec --json`)                                      |
//!
//! The graph only talks to [`AgentExecutor`]; [`create_executor`] picks the
//! implementation from configuration.

pub mod claude;
pub mod codex;
pub(crate) mod stream;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::ShipyardConfig;
use crate::errors::ExecutorError;

pub use claude::ClaudeCodeExecutor;
pub use codex::CodexExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    #[default]
    ClaudeCode,
    Codex,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" | "claude" => Ok(Self::ClaudeCode),
            "codex" => Ok(Self::Codex),
            _ => Err(format!("Invalid agent kind: {}", s)),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional capabilities an executor may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorFeature {
    SessionResume,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Agent session to continue, when the executor supports it.
    pub resume_session: Option<String>,
    /// Suppress progress logging.
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub result: String,
    pub session_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Progress(String),
    Result(ExecutionResult),
    Error(String),
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn supports_feature(&self, feature: ExecutorFeature) -> bool;

    /// Run the agent to completion and return its final answer.
    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError>;

    /// Run the agent in the background, yielding progress events followed by
    /// exactly one `Result` or `Error`.
    async fn execute_stream(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<mpsc::Receiver<AgentEvent>, ExecutorError>;
}

/// Settings every executor variant needs.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub command: String,
    pub skip_permissions: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &ShipyardConfig, kind: AgentKind) -> Self {
        Self {
            command: config.agent_command_for(kind),
            skip_permissions: std::env::var("SKIP_PERMISSIONS")
                .map(|v| v != "false")
                .unwrap_or(true),
        }
    }
}

/// Build the executor for `kind`.
pub fn create_executor(kind: AgentKind, settings: ExecutorSettings) -> Arc<dyn AgentExecutor> {
    match kind {
        AgentKind::ClaudeCode => Arc::new(ClaudeCodeExecutor::new(settings)),
        AgentKind::Codex => Arc::new(CodexExecutor::new(settings)),
    }
}
