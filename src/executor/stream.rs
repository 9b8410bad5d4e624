//! Subprocess runner shared by the agent executors.
//!
//! Spawns the agent CLI, writes the prompt to stdin, and reads
//! newline-delimited JSON from stdout. Each parsed line goes to a
//! [`LineHandler`] that updates a [`Transcript`]. Lines that are not JSON are
//! logged and skipped.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AgentEvent, ExecuteOptions, ExecutionResult};
use crate::errors::ExecutorError;

const STDERR_LIMIT: usize = 4_000;

/// A fully resolved agent invocation.
#[derive(Debug, Clone)]
pub(crate) struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: String,
}

/// What the agent has said so far.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    pub session_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Concatenated assistant text, used when no explicit result arrives.
    pub text: String,
    pub metadata: Option<Value>,
}

/// Fold one JSON event into the transcript; return a progress line, if any.
pub(crate) type LineHandler = fn(&Value, &mut Transcript) -> Option<String>;

/// Run the agent to completion, forwarding progress to `events` when given.
pub(crate) async fn run_agent(
    command: AgentCommand,
    options: &ExecuteOptions,
    handle_line: LineHandler,
    events: Option<&mpsc::Sender<AgentEvent>>,
) -> Result<ExecutionResult, ExecutorError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(&options.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            command: command.program.clone(),
            source,
        })?;

    // Written concurrently with the stdout read; the timeout bounds both.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let prompt = command.stdin.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(error = %e, "agent closed stdin before reading the whole prompt");
                return;
            }
            let _ = stdin.shutdown().await;
        })
    });

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutorError::Agent("agent stdout was not captured".into()))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut transcript = Transcript::default();

    let outcome = tokio::time::timeout(options.timeout, async {
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value = match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, line = trimmed, "ignoring malformed agent output line");
                    continue;
                }
            };
            if let Some(progress) = handle_line(&value, &mut transcript) {
                if !options.silent {
                    info!(target: "shipyard::agent", "{}", progress);
                }
                if let Some(tx) = events {
                    let _ = tx.send(AgentEvent::Progress(progress)).await;
                }
            }
        }
        child.wait().await
    })
    .await;

    let status = match outcome {
        Ok(status) => status?,
        Err(_) => {
            warn!(
                program = %command.program,
                seconds = options.timeout.as_secs(),
                "agent timed out, killing it"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out agent");
            }
            if let Some(task) = stdin_task {
                task.abort();
            }
            return Err(ExecutorError::Timeout {
                seconds: options.timeout.as_secs(),
            });
        }
    };

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if let Some(error) = transcript.error.take() {
        return Err(ExecutorError::Agent(error));
    }
    if !status.success() {
        let tail: String = stderr
            .chars()
            .rev()
            .take(STDERR_LIMIT)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(ExecutorError::NonZeroExit {
            code: status.code(),
            stderr: tail.trim().to_string(),
        });
    }

    let result = transcript
        .result
        .take()
        .unwrap_or_else(|| transcript.text.trim().to_string());
    Ok(ExecutionResult {
        result,
        session_id: transcript.session_id,
        metadata: transcript.metadata,
    })
}

/// Run the agent on a background task and return its event channel.
pub(crate) fn spawn_stream(
    command: AgentCommand,
    options: ExecuteOptions,
    handle_line: LineHandler,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let final_event = match run_agent(command, &options, handle_line, Some(&tx)).await {
            Ok(result) => AgentEvent::Result(result),
            Err(e) => AgentEvent::Error(e.to_string()),
        };
        let _ = tx.send(final_event).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo_handler(value: &Value, transcript: &mut Transcript) -> Option<String> {
        match value.get("kind").and_then(Value::as_str) {
            Some("say") => {
                let text = value.get("text").and_then(Value::as_str).unwrap_or("");
                transcript.text.push_str(text);
                Some(format!("said {}", text))
            }
            Some("done") => {
                transcript.result = value.get("text").and_then(Value::as_str).map(String::from);
                transcript.session_id = Some("s-1".into());
                None
            }
            Some("fail") => {
                transcript.error = Some("agent gave up".into());
                None
            }
            _ => None,
        }
    }

    fn sh(script: &str) -> AgentCommand {
        AgentCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            stdin: String::new(),
        }
    }

    fn options(timeout: Duration) -> ExecuteOptions {
        ExecuteOptions {
            cwd: std::env::temp_dir(),
            timeout,
            resume_session: None,
            silent: true,
        }
    }

    #[tokio::test]
    async fn test_parses_ndjson_and_skips_malformed_lines() {
        let script = r#"echo '{"kind":"say","text":"hi"}'; echo 'not json'; echo '{"kind":"done","text":"final"}'"#;
        let result = run_agent(sh(script), &options(Duration::from_secs(10)), echo_handler, None)
            .await
            .unwrap();
        assert_eq!(result.result, "final");
        assert_eq!(result.session_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn test_falls_back_to_accumulated_text() {
        let script = r#"echo '{"kind":"say","text":"partial answer"}'"#;
        let result = run_agent(sh(script), &options(Duration::from_secs(10)), echo_handler, None)
            .await
            .unwrap();
        assert_eq!(result.result, "partial answer");
    }

    #[tokio::test]
    async fn test_prompt_is_written_to_stdin() {
        let mut command = sh(r#"read line; printf '{"kind":"done","text":"%s"}\n' "$line""#);
        command.stdin = "hello agent\n".into();
        let result = run_agent(command, &options(Duration::from_secs(10)), echo_handler, None)
            .await
            .unwrap();
        assert_eq!(result.result, "hello agent");
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let err = run_agent(sh("sleep 5"), &options(Duration::from_millis(100)), echo_handler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_prompt() {
        let command = AgentCommand {
            program: "sleep".into(),
            args: vec!["6".into()],
            stdin: "x".repeat(1_000_000),
        };
        let started = std::time::Instant::now();
        let err = run_agent(command, &options(Duration::from_millis(500)), echo_handler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let err = run_agent(sh("echo boom >&2; exit 3"), &options(Duration::from_secs(10)), echo_handler, None)
            .await
            .unwrap_err();
        match err {
            ExecutorError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_reported_error() {
        let err = run_agent(sh(r#"echo '{"kind":"fail"}'"#), &options(Duration::from_secs(10)), echo_handler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Agent(msg) if msg == "agent gave up"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = AgentCommand {
            program: "/definitely/not/a/real/agent".into(),
            args: vec![],
            stdin: String::new(),
        };
        let err = run_agent(command, &options(Duration::from_secs(1)), echo_handler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_stream_emits_progress_then_result() {
        let script = r#"echo '{"kind":"say","text":"a"}'; echo '{"kind":"done","text":"b"}'"#;
        let mut rx = spawn_stream(sh(script), options(Duration::from_secs(10)), echo_handler);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], AgentEvent::Progress(p) if p == "said a"));
        assert!(matches!(&events[1], AgentEvent::Result(r) if r.result == "b"));
    }
}
