//! Subprocess providers (`codex`, `nanobot`, `pi`): spawn the local CLI, hand
//! it the request as one JSON line on stdin, and stream JSONL events back
//! from stdout until `done`.
//!
//! Event contract (one JSON object per line):
//!   {"type":"assistant","text":"..."}
//!   {"type":"tool_call","id":"...","name":"...","arguments":"{...}"}
//!   {"type":"usage","prompt_tokens":1,"completion_tokens":2}
//!   {"type":"done"}

use std::process::Stdio;

use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;

use super::CompletionRequest;
use super::ModelTurn;
use super::TokenUsage;
use aidesk_protocol::ToolCallRequest;

use crate::error::CoreErr;
use crate::error::Result;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderEvent {
    Assistant {
        text: String,
    },
    ToolCall {
        id: Option<String>,
        name: String,
        arguments: String,
    },
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    Done,
}

pub(super) async fn complete(command: &[String], request: &CompletionRequest) -> Result<ModelTurn> {
    let Some(program) = command.first() else {
        return Err(CoreErr::ProviderFailure("empty provider command".to_string()));
    };

    let mut child = Command::new(program)
        .args(&command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CoreErr::ProviderFailure(format!("failed to spawn {program}: {e}")))?;

    // One request line, then close stdin so the child knows input is over.
    {
        let mut stdin = child.stdin.take().ok_or_else(|| {
            CoreErr::ProviderFailure("stdin pipe was unexpectedly not available".to_string())
        })?;
        let request_line = serde_json::to_string(&json!({
            "model": request.model,
            "messages": request.messages,
            "tools": request.tools,
        }))?;
        stdin.write_all(request_line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
    }

    let stdout = child.stdout.take().ok_or_else(|| {
        CoreErr::ProviderFailure("stdout pipe was unexpectedly not available".to_string())
    })?;
    let mut lines = BufReader::new(stdout).lines();

    let mut turn = ModelTurn::default();
    let mut text = String::new();
    let mut call_counter = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: ProviderEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                debug!("ignoring malformed provider event: {e}");
                continue;
            }
        };
        match event {
            ProviderEvent::Assistant { text: fragment } => text.push_str(&fragment),
            ProviderEvent::ToolCall {
                id,
                name,
                arguments,
            } => {
                call_counter += 1;
                turn.tool_calls.push(ToolCallRequest {
                    id: id.unwrap_or_else(|| format!("call_{call_counter}")),
                    name,
                    args: arguments,
                });
            }
            ProviderEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                turn.usage = Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                });
            }
            ProviderEvent::Done => break,
        }
    }

    // Reap the child; a nonzero exit after a complete event stream is logged
    // but does not fail the turn.
    match child.wait().await {
        Ok(status) if !status.success() => {
            warn!("{program} exited with {status}");
        }
        Ok(_) => {}
        Err(e) => warn!("failed to reap {program}: {e}"),
    }

    turn.assistant_text = if text.is_empty() { None } else { Some(text) };
    Ok(turn)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use aidesk_protocol::ChatMessage;
    use pretty_assertions::assert_eq;

    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "local".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn parses_the_jsonl_contract() {
        // `cat` is not a provider; emit a canned stream with a tiny script.
        let script = r#"read _line
echo '{"type":"assistant","text":"partial "}'
echo '{"type":"assistant","text":"answer"}'
echo '{"type":"tool_call","name":"fs_list","arguments":"{}"}'
echo '{"type":"usage","prompt_tokens":5,"completion_tokens":2}'
echo '{"type":"done"}'"#;
        let command = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];

        let turn = complete(&command, &request()).await.unwrap();
        assert_eq!(turn.assistant_text.as_deref(), Some("partial answer"));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "fs_list");
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.usage.unwrap().prompt_tokens, 5);
    }

    #[tokio::test]
    async fn missing_binary_is_a_provider_failure() {
        let command = vec!["aidesk-no-such-binary".to_string()];
        let err = complete(&command, &request()).await.unwrap_err();
        assert!(matches!(err, CoreErr::ProviderFailure(_)));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let script = r#"read _line
echo 'not json at all'
echo '{"type":"assistant","text":"ok"}'
echo '{"type":"done"}'"#;
        let command = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
        let turn = complete(&command, &request()).await.unwrap();
        assert_eq!(turn.assistant_text.as_deref(), Some("ok"));
    }
}
