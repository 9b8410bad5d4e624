//! Claude Code CLI executor.
//!
//! Runs `claude -p --output-format stream-json --verbose` with the prompt on
//! stdin and `--resume <session>` for session continuity.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::stream::{self, AgentCommand, Transcript};
use super::{
    AgentEvent, AgentExecutor, AgentKind, ExecuteOptions, ExecutionResult, ExecutorFeature,
    ExecutorSettings,
};
use crate::errors::ExecutorError;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        num_turns: Option<u64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },

    #[serde(rename = "system")]
    System {
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Human-readable description of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" => format!("Reading: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".into())),
        "Write" => format!("Creating: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".into())),
        "Edit" => format!("Editing: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".into())),
        "Bash" => format!("Running: {}", field("command").map(|c| truncate_str(c, 60)).unwrap_or_else(|| "command".into())),
        "Glob" | "Grep" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        _ => name.to_string(),
    }
}

fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..s.floor_char_boundary(max_len - 3)])
    }
}

fn handle_line(value: &Value, transcript: &mut Transcript) -> Option<String> {
    let event = serde_json::from_value::<StreamEvent>(value.clone()).ok()?;
    match event {
        StreamEvent::System { subtype, session_id } => {
            if session_id.is_some() {
                transcript.session_id = session_id;
            }
            (subtype == "init").then(|| "Session started".to_string())
        }
        StreamEvent::Assistant { message, session_id } => {
            if session_id.is_some() {
                transcript.session_id = session_id;
            }
            let mut progress = None;
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => {
                        transcript.text.push_str(&text);
                        transcript.text.push('\n');
                    }
                    ContentBlock::ToolUse { name, input } => {
                        progress = Some(describe_tool_use(&name, &input));
                    }
                    ContentBlock::Other => {}
                }
            }
            progress
        }
        StreamEvent::User {} => None,
        StreamEvent::Result {
            subtype,
            result,
            is_error,
            session_id,
            num_turns,
            total_cost_usd,
        } => {
            if session_id.is_some() {
                transcript.session_id = session_id;
            }
            transcript.metadata = Some(serde_json::json!({
                "subtype": subtype,
                "numTurns": num_turns,
                "totalCostUsd": total_cost_usd,
            }));
            if is_error || subtype.starts_with("error") {
                transcript.error = Some(result.unwrap_or(subtype));
            } else {
                transcript.result = result;
            }
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaudeCodeExecutor {
    settings: ExecutorSettings,
}

impl ClaudeCodeExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    fn command(&self, prompt: &str, options: &ExecuteOptions) -> AgentCommand {
        let mut args = Vec::new();
        if self.settings.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.extend(
            ["--print", "--output-format", "stream-json", "--verbose"]
                .iter()
                .map(|s| s.to_string()),
        );
        if let Some(session) = &options.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        AgentCommand {
            program: self.settings.command.clone(),
            args,
            stdin: prompt.to_string(),
        }
    }
}

#[async_trait]
impl AgentExecutor for ClaudeCodeExecutor {
    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn supports_feature(&self, feature: ExecutorFeature) -> bool {
        match feature {
            ExecutorFeature::SessionResume | ExecutorFeature::Streaming => true,
        }
    }

    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        stream::run_agent(self.command(prompt, options), options, handle_line, None).await
    }

    async fn execute_stream(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<mpsc::Receiver<AgentEvent>, ExecutorError> {
        Ok(stream::spawn_stream(
            self.command(prompt, options),
            options.clone(),
            handle_line,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn executor() -> ClaudeCodeExecutor {
        ClaudeCodeExecutor::new(ExecutorSettings {
            command: "claude".into(),
            skip_permissions: true,
        })
    }

    fn options(resume: Option<&str>) -> ExecuteOptions {
        ExecuteOptions {
            cwd: PathBuf::from("/tmp"),
            timeout: Duration::from_secs(5),
            resume_session: resume.map(String::from),
            silent: true,
        }
    }

    #[test]
    fn test_command_includes_resume_flag() {
        let cmd = executor().command("do it", &options(Some("sess-9")));
        assert_eq!(cmd.program, "claude");
        assert_eq!(cmd.stdin, "do it");
        let joined = cmd.args.join(" ");
        assert!(joined.contains("--output-format stream-json"));
        assert!(joined.ends_with("--resume sess-9"));
    }

    #[test]
    fn test_command_without_session() {
        let cmd = executor().command("do it", &options(None));
        assert!(!cmd.args.iter().any(|a| a == "--resume"));
    }

    #[test]
    fn test_handle_line_collects_session_and_result() {
        let mut t = Transcript::default();
        handle_line(
            &json!({"type": "system", "subtype": "init", "session_id": "abc"}),
            &mut t,
        );
        let progress = handle_line(
            &json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "Looking around"},
                {"type": "tool_use", "name": "Read", "input": {"file_path": "/repo/src/main.rs"}, "id": "1"},
                {"type": "thinking", "thinking": "hmm"}
            ]}, "session_id": "abc"}),
            &mut t,
        );
        assert_eq!(progress.as_deref(), Some("Reading: src/main.rs"));
        handle_line(
            &json!({"type": "result", "subtype": "success", "result": "All done", "is_error": false, "session_id": "abc", "num_turns": 4}),
            &mut t,
        );
        assert_eq!(t.session_id.as_deref(), Some("abc"));
        assert_eq!(t.result.as_deref(), Some("All done"));
        assert!(t.text.contains("Looking around"));
        assert_eq!(t.metadata.unwrap()["numTurns"], 4);
    }

    #[test]
    fn test_handle_line_error_result() {
        let mut t = Transcript::default();
        handle_line(
            &json!({"type": "result", "subtype": "error_max_turns", "is_error": true}),
            &mut t,
        );
        assert_eq!(t.error.as_deref(), Some("error_max_turns"));
        assert!(t.result.is_none());
    }

    #[test]
    fn test_handle_line_ignores_unknown_events() {
        let mut t = Transcript::default();
        assert!(handle_line(&json!({"type": "stream_event", "x": 1}), &mut t).is_none());
        assert!(handle_line(&json!({"no_type": true}), &mut t).is_none());
        assert!(t.result.is_none());
    }

    #[test]
    fn test_describe_tool_use() {
        let input = json!({"file_path": "/Users/foo/project/src/main.rs"});
        assert_eq!(describe_tool_use("Read", &input), "Reading: src/main.rs");
        let input = json!({"command": "cargo test --release"});
        assert_eq!(describe_tool_use("Bash", &input), "Running: cargo test --release");
        assert_eq!(describe_tool_use("WebFetch", &json!({})), "WebFetch");
    }

    #[test]
    fn test_supports_session_resume() {
        assert!(executor().supports_feature(ExecutorFeature::SessionResume));
    }
}
