//! Codex CLI executor.
//!
//! Runs `codex exec --json -` with the prompt on stdin. Codex sessions are not
//! resumed across phases; each call starts fresh.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::stream::{self, AgentCommand, Transcript};
use super::{
    AgentEvent, AgentExecutor, AgentKind, ExecuteOptions, ExecutionResult, ExecutorFeature,
    ExecutorSettings,
};
use crate::errors::ExecutorError;

fn handle_line(value: &Value, transcript: &mut Transcript) -> Option<String> {
    let str_at = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);
    match value.get("type").and_then(Value::as_str)? {
        "thread.started" => {
            transcript.session_id = str_at(value, "thread_id");
            Some("Session started".to_string())
        }
        "item.started" | "item.completed" => {
            let item = value.get("item")?;
            match item.get("type").and_then(Value::as_str)? {
                "agent_message" => {
                    let text = str_at(item, "text")?;
                    transcript.text.push_str(&text);
                    transcript.text.push('\n');
                    transcript.result = Some(text);
                    None
                }
                "command_execution" => str_at(item, "command").map(|c| format!("Running: {}", c)),
                "file_change" => Some("Editing files".to_string()),
                _ => None,
            }
        }
        "turn.completed" => {
            transcript.metadata = value.get("usage").map(|u| serde_json::json!({ "usage": u }));
            None
        }
        "turn.failed" => {
            transcript.error = value
                .get("error")
                .and_then(|e| str_at(e, "message"))
                .or_else(|| Some("turn failed".to_string()));
            None
        }
        "error" => {
            transcript.error = str_at(value, "message").or_else(|| Some("codex error".to_string()));
            None
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct CodexExecutor {
    settings: ExecutorSettings,
}

impl CodexExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    fn command(&self, prompt: &str) -> AgentCommand {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if self.settings.skip_permissions {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        } else {
            args.push("--full-auto".to_string());
        }
        args.push("-".to_string());
        AgentCommand {
            program: self.settings.command.clone(),
            args,
            stdin: prompt.to_string(),
        }
    }
}

#[async_trait]
impl AgentExecutor for CodexExecutor {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn supports_feature(&self, feature: ExecutorFeature) -> bool {
        matches!(feature, ExecutorFeature::Streaming)
    }

    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        stream::run_agent(self.command(prompt), options, handle_line, None).await
    }

    async fn execute_stream(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<mpsc::Receiver<AgentEvent>, ExecutorError> {
        Ok(stream::spawn_stream(
            self.command(prompt),
            options.clone(),
            handle_line,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_reads_prompt_from_stdin() {
        let exec = CodexExecutor::new(ExecutorSettings {
            command: "codex".into(),
            skip_permissions: false,
        });
        let cmd = exec.command("fix it");
        assert_eq!(cmd.args, vec!["exec", "--json", "--full-auto", "-"]);
        assert_eq!(cmd.stdin, "fix it");
    }

    #[test]
    fn test_last_agent_message_is_result() {
        let mut t = Transcript::default();
        handle_line(&json!({"type": "thread.started", "thread_id": "th-1"}), &mut t);
        let progress = handle_line(
            &json!({"type": "item.completed", "item": {"type": "command_execution", "command": "cargo test"}}),
            &mut t,
        );
        assert_eq!(progress.as_deref(), Some("Running: cargo test"));
        handle_line(&json!({"type": "item.completed", "item": {"type": "agent_message", "text": "first"}}), &mut t);
        handle_line(&json!({"type": "item.completed", "item": {"type": "agent_message", "text": "second"}}), &mut t);
        handle_line(&json!({"type": "turn.completed", "usage": {"input_tokens": 10}}), &mut t);
        assert_eq!(t.result.as_deref(), Some("second"));
        assert_eq!(t.session_id.as_deref(), Some("th-1"));
        assert_eq!(t.metadata.unwrap()["usage"]["input_tokens"], 10);
    }

    #[test]
    fn test_turn_failed_sets_error() {
        let mut t = Transcript::default();
        handle_line(&json!({"type": "turn.failed", "error": {"message": "rate limited"}}), &mut t);
        assert_eq!(t.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let mut t = Transcript::default();
        assert!(handle_line(&json!({"type": "reasoning"}), &mut t).is_none());
        assert!(handle_line(&json!({"msg": "no type"}), &mut t).is_none());
        assert!(t.error.is_none());
    }
}
