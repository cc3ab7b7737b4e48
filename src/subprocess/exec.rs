// src/subprocess/exec.rs
// C7: SubprocessPeerExec — one-shot `codex exec` fallback used when the
// persistent peer channel returns no response (spec.md §4.8).

use super::schemas::{render_markdown, schema_for_message_type};
use crate::config::BridgeConfig;
use crate::db::invocations::{self, NewInvocation};
use crate::db::Database;
use crate::identity::AssistantId;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

const MAX_RAW_STDOUT_BYTES: usize = 50_000;
const MAX_COMMAND_OUTPUT_CHARS: usize = 500;

pub struct ExecOutcome {
    pub response_text: Option<String>,
    pub invocation_error: Option<String>,
}

pub struct SubprocessPeerExec {
    config: Arc<BridgeConfig>,
    db: Arc<Database>,
}

impl SubprocessPeerExec {
    pub fn new(config: Arc<BridgeConfig>, db: Arc<Database>) -> Self {
        Self { config, db }
    }

    pub async fn run(
        &self,
        invocation_id: &str,
        message_id: &str,
        target: AssistantId,
        message_type: &str,
        prompt: &str,
        timeout_ms: u64,
        use_output_schema: bool,
    ) -> anyhow::Result<ExecOutcome> {
        let schema_path = if use_output_schema {
            Some(write_schema_file(schema_for_message_type(message_type))?)
        } else {
            None
        };

        let mut args: Vec<String> =
            vec!["exec".into(), "--json".into(), "--full-auto".into(), "--skip-git-repo-check".into()];
        if let Some(path) = &schema_path {
            args.push("--output-schema".into());
            args.push(path.display().to_string());
        }
        args.push(prompt.to_string());

        let command_str = format!("{} {}", self.config.codex_path, args.join(" "));
        {
            let id = invocation_id.to_string();
            let mid = message_id.to_string();
            let cmd = command_str.clone();
            self.db
                .interact(move |conn| {
                    invocations::create(
                        conn,
                        NewInvocation {
                            id: &id,
                            target,
                            message_id: &mid,
                            invocation_type: "subprocess_exec",
                            command: Some(&cmd),
                        },
                    )?;
                    Ok(())
                })
                .await?;
        }

        {
            let id = invocation_id.to_string();
            self.db.interact(move |conn| Ok(invocations::mark_running(conn, &id)?)).await?;
        }

        let mut child = Command::new(&self.config.codex_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut raw = String::new();
            let mut events = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                raw.push_str(&line);
                raw.push('\n');
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    events.push(value);
                }
            }
            (raw, events)
        });

        let wait_result = timeout(Duration::from_millis(timeout_ms), child.wait()).await;

        let mut stderr_buf = String::new();
        let _ = stderr.read_to_string(&mut stderr_buf).await;

        match wait_result {
            Err(_) => {
                let _ = child.kill().await;
                let id = invocation_id.to_string();
                self.db
                    .interact(move |conn| {
                        Ok(invocations::mark_finished(conn, &id, "timeout", None, Some(&stderr_buf), None)?)
                    })
                    .await?;
                return Ok(ExecOutcome {
                    response_text: None,
                    invocation_error: Some("invocation timed out".to_string()),
                });
            }
            Ok(Err(e)) => {
                let id = invocation_id.to_string();
                self.db
                    .interact(move |conn| {
                        Ok(invocations::mark_finished(conn, &id, "failed", None, Some(&stderr_buf), None)?)
                    })
                    .await?;
                return Ok(ExecOutcome { response_text: None, invocation_error: Some(e.to_string()) });
            }
            Ok(Ok(status)) => {
                let (raw_stdout, events) = stdout_task.await.unwrap_or_default();
                let exit_code = status.code();
                let succeeded = status.success();

                let db_status = if succeeded { "completed" } else { "failed" };
                {
                    let id = invocation_id.to_string();
                    let stdout_clone = raw_stdout.clone();
                    let stderr_clone = stderr_buf.clone();
                    self.db
                        .interact(move |conn| {
                            Ok(invocations::mark_finished(
                                conn,
                                &id,
                                db_status,
                                Some(&stdout_clone),
                                Some(&stderr_clone),
                                exit_code,
                            )?)
                        })
                        .await?;
                }

                if !succeeded {
                    return Ok(ExecOutcome {
                        response_text: None,
                        invocation_error: Some(if stderr_buf.is_empty() {
                            "invocation failed with no output".to_string()
                        } else {
                            stderr_buf
                        }),
                    });
                }

                let extracted = extract_output(&events, &raw_stdout);
                let response_text = extracted.map(|raw| {
                    if use_output_schema {
                        render_markdown(message_type, &raw)
                    } else {
                        raw
                    }
                });

                if response_text.is_none() {
                    warn!(invocation_id, "codex exec produced no extractable output");
                }

                Ok(ExecOutcome {
                    response_text,
                    invocation_error: None,
                })
            }
        }
    }
}

fn write_schema_file(schema: &str) -> std::io::Result<std::path::PathBuf> {
    let mut path = std::env::temp_dir();
    let name = format!("peerbridge-schema-{:x}.json", simple_hash(schema));
    path.push(name);
    if !path.exists() {
        std::fs::write(&path, schema)?;
    }
    Ok(path)
}

fn simple_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Priority-ordered output extraction over the child's line-delimited event
/// stream (spec.md §4.8).
fn extract_output(events: &[Value], raw_stdout: &str) -> Option<String> {
    // 1. Last response.completed/turn.completed with output_text.
    for event in events.iter().rev() {
        let event_type = event.get("type").and_then(Value::as_str);
        let output_text = match event_type {
            Some("response.completed") => event.get("response").and_then(|r| r.get("output_text")),
            Some("turn.completed") => event.get("output_text"),
            _ => None,
        };
        if let Some(text) = output_text.and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    // 2. Last item.completed agent_message with non-empty text.
    for event in events.iter().rev() {
        if event.get("type").and_then(Value::as_str) != Some("item.completed") {
            continue;
        }
        let item = event.get("item");
        let is_agent_message = item.and_then(|i| i.get("type")).and_then(Value::as_str) == Some("agent_message");
        if !is_agent_message {
            continue;
        }
        if let Some(text) = item.and_then(|i| i.get("text")).and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    // 3. Legacy {type:"message", role:"assistant", content:...}.
    for event in events.iter().rev() {
        if event.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        if event.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        if let Some(content) = event.get("content") {
            let text = content.as_str().map(str::to_string).or_else(|| {
                content.as_array().map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("")
                })
            });
            if let Some(text) = text {
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }

    // 4. Synthesised exploration summary.
    if let Some(summary) = synthesize_exploration_summary(events) {
        return Some(summary);
    }

    // 5. Raw stdout fallback, truncated.
    if !raw_stdout.trim().is_empty() {
        return Some(truncate_with_marker(raw_stdout, MAX_RAW_STDOUT_BYTES));
    }

    None
}

fn synthesize_exploration_summary(events: &[Value]) -> Option<String> {
    let reasoning: Vec<&str> = events
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some("reasoning"))
        .filter_map(|e| e.get("text").and_then(Value::as_str))
        .collect();
    let reasoning: Vec<&str> = reasoning.iter().rev().take(2).rev().copied().collect();

    let commands: Vec<&Value> = events
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some("command_execution"))
        .collect();
    let commands: Vec<&Value> = commands.iter().rev().take(3).rev().copied().collect();

    if reasoning.is_empty() && commands.is_empty() {
        return None;
    }

    let mut out = String::from("[exploration - no final answer]\n");
    for r in reasoning {
        out.push_str(r);
        out.push('\n');
    }
    for command in commands {
        let cmd = command.get("command").and_then(Value::as_str).unwrap_or("");
        let aggregated = command.get("aggregated_output").and_then(Value::as_str).unwrap_or("");
        let exit_code = command.get("exit_code").and_then(Value::as_i64);
        let truncated: String = aggregated.chars().take(MAX_COMMAND_OUTPUT_CHARS).collect();
        let ellipsis = if aggregated.chars().count() > MAX_COMMAND_OUTPUT_CHARS { "[...]" } else { "" };
        out.push_str(&format!("$ {cmd}\n{truncated}{ellipsis}"));
        if let Some(code) = exit_code {
            if code != 0 {
                out.push_str(&format!(" (exit: {code})"));
            }
        }
        out.push('\n');
    }
    Some(out)
}

fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[...truncated...]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_response_completed_output_text() {
        let events = vec![json!({"type": "response.completed", "response": {"output_text": "final answer"}})];
        assert_eq!(extract_output(&events, ""), Some("final answer".to_string()));
    }

    #[test]
    fn prefers_latest_matching_event() {
        let events = vec![
            json!({"type": "turn.completed", "output_text": "first"}),
            json!({"type": "turn.completed", "output_text": "second"}),
        ];
        assert_eq!(extract_output(&events, ""), Some("second".to_string()));
    }

    #[test]
    fn falls_back_to_agent_message_item() {
        let events = vec![json!({"type": "item.completed", "item": {"type": "agent_message", "text": "hello"}})];
        assert_eq!(extract_output(&events, ""), Some("hello".to_string()));
    }

    #[test]
    fn synthesizes_exploration_summary_when_no_final_answer() {
        let events = vec![
            json!({"type": "reasoning", "text": "checking the test suite"}),
            json!({"type": "command_execution", "command": "cargo test", "aggregated_output": "ok", "exit_code": 0}),
        ];
        let out = extract_output(&events, "").unwrap();
        assert!(out.starts_with("[exploration - no final answer]"));
        assert!(out.contains("checking the test suite"));
        assert!(out.contains("$ cargo test"));
    }

    #[test]
    fn falls_back_to_raw_stdout_when_nothing_else_matches() {
        let out = extract_output(&[], "raw unparsed output").unwrap();
        assert_eq!(out, "raw unparsed output");
    }

    #[test]
    fn truncates_long_raw_stdout() {
        let long = "a".repeat(MAX_RAW_STDOUT_BYTES + 100);
        let out = extract_output(&[], &long).unwrap();
        assert!(out.ends_with("[...truncated...]"));
        assert!(out.len() < long.len());
    }
}
