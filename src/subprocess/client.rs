// src/subprocess/client.rs
// C6: SubprocessPeerClient — a persistent stdio JSON-RPC channel to a
// `codex mcp` child process (spec.md §4.7). Request/response correlation
// follows the pending-map-plus-oneshot pattern used by stdio MCP proxies.

use crate::config::BridgeConfig;
use crate::persona::Persona;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct Connected {
    child: Child,
    stdin: ChildStdin,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    conversation_ids: HashMap<String, String>,
}

/// Persistent peer connection. One instance is shared across all sessions;
/// reconnection is transparent to callers.
pub struct SubprocessPeerClient {
    config: Arc<BridgeConfig>,
    next_id: AtomicU64,
    inner: Mutex<Option<Connected>>,
}

impl SubprocessPeerClient {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config, next_id: AtomicU64::new(1), inner: Mutex::new(None) }
    }

    /// Try the persistent channel. Returns `Ok(None)` (never `Err`) on any
    /// connection or protocol failure so callers fall through to the
    /// one-shot exec fallback — per spec.md §4.9 tier A/B, only a genuine
    /// response disambiguates from "try tier B".
    pub async fn send_message(
        &self,
        prompt: &str,
        message_id: Option<&str>,
        persona: &Persona,
    ) -> Option<String> {
        match self.try_send_message(prompt, message_id, persona).await {
            Ok((text, _conversation_id)) => text,
            Err(e) => {
                warn!(error = %e, "subprocess peer client failed, disconnecting");
                self.disconnect().await;
                None
            }
        }
    }

    /// Returns `(response_text, conversation_id)`.
    async fn try_send_message(
        &self,
        prompt: &str,
        message_id: Option<&str>,
        persona: &Persona,
    ) -> anyhow::Result<(Option<String>, Option<String>)> {
        self.ensure_connected().await?;

        let remembered = message_id.and_then(|id| {
            let guard = self.inner.try_lock().ok()?;
            guard.as_ref()?.conversation_ids.get(id).cloned()
        });

        let (tool_name, arguments) = if let Some(conversation_id) = remembered {
            ("codex-reply", json!({ "conversation_id": conversation_id, "prompt": prompt }))
        } else {
            let sandbox = persona.sandbox_override.unwrap_or(&self.config.codex_sandbox);
            (
                "codex",
                json!({
                    "prompt": prompt,
                    "approval-policy": self.config.codex_approval_policy,
                    "sandbox": sandbox,
                    "base-instructions": persona.base_instructions,
                }),
            )
        };

        let result = self.call_tool(tool_name, arguments).await?;
        let (text, conversation_id) = extract_response(&result);

        if let (Some(mid), Some(cid)) = (message_id, conversation_id.clone()) {
            let mut guard = self.inner.lock().await;
            if let Some(connected) = guard.as_mut() {
                connected.conversation_ids.insert(mid.to_string(), cid);
            }
        }

        Ok((text, conversation_id))
    }

    async fn ensure_connected(&self) -> anyhow::Result<()> {
        {
            let guard = self.inner.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }
        self.connect().await
    }

    async fn connect(&self) -> anyhow::Result<()> {
        let mut child = Command::new(&self.config.codex_path)
            .arg("mcp")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("no child stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no child stdout"))?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                            debug!(line = %line, "codex peer emitted non-JSON line");
                            continue;
                        };
                        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                let _ = tx.send(msg);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading codex peer stdout");
                        break;
                    }
                }
            }
        });

        let mut connected = Connected { child, stdin, pending, conversation_ids: HashMap::new() };

        let init_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let init_request = json!({
            "jsonrpc": "2.0",
            "id": init_id,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "peerbridge", "version": env!("CARGO_PKG_VERSION") } },
        });
        send_request(&mut connected, init_id, init_request).await?;

        let list_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let list_request = json!({ "jsonrpc": "2.0", "id": list_id, "method": "tools/list" });
        let list_response = send_request(&mut connected, list_id, list_request).await?;

        let has_codex_tool = list_response
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .is_some_and(|tools| tools.iter().any(|t| t.get("name").and_then(Value::as_str) == Some("codex")));

        if !has_codex_tool {
            anyhow::bail!("codex peer did not advertise a `codex` tool");
        }

        *self.inner.lock().await = Some(connected);
        Ok(())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        });

        let mut guard = self.inner.lock().await;
        let connected = guard.as_mut().ok_or_else(|| anyhow::anyhow!("not connected"))?;
        send_request(connected, id, request).await
    }

    async fn disconnect(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut connected) = guard.take() {
            let _ = connected.child.kill().await;
        }
    }
}

async fn send_request(connected: &mut Connected, id: u64, request: Value) -> anyhow::Result<Value> {
    let (tx, rx) = oneshot::channel();
    connected.pending.lock().await.insert(id, tx);

    let mut serialized = serde_json::to_vec(&request)?;
    serialized.push(b'\n');
    connected.stdin.write_all(&serialized).await?;
    connected.stdin.flush().await?;

    let response = timeout(REQUEST_TIMEOUT, rx)
        .await
        .map_err(|_| anyhow::anyhow!("codex peer request timed out"))?
        .map_err(|_| anyhow::anyhow!("codex peer closed the response channel"))?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("codex peer returned error: {error}");
    }
    Ok(response)
}

/// Extract the response text and remembered conversation id from a
/// `tools/call` result, per spec.md §4.7 step 3.
fn extract_response(result: &Value) -> (Option<String>, Option<String>) {
    let content = result.get("result").and_then(|r| r.get("content")).and_then(Value::as_array);
    let text = content.and_then(|items| {
        items.iter().find_map(|item| {
            if item.get("type").and_then(Value::as_str) == Some("text") {
                item.get("text").and_then(Value::as_str)
            } else {
                None
            }
        })
    });

    let response_text = text.map(|t| {
        serde_json::from_str::<Value>(t)
            .ok()
            .and_then(|v| v.get("response").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| t.to_string())
    });

    let conversation_id = text
        .and_then(|t| serde_json::from_str::<Value>(t).ok())
        .and_then(|v| v.get("conversationId").and_then(Value::as_str).map(str::to_string))
        .or_else(|| {
            result
                .get("result")
                .and_then(|r| r.get("_meta"))
                .and_then(|m| m.get("conversationId"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    (response_text, conversation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_plain_text_response() {
        let result = json!({
            "result": { "content": [{ "type": "text", "text": "all good" }] }
        });
        let (text, cid) = extract_response(&result);
        assert_eq!(text.as_deref(), Some("all good"));
        assert_eq!(cid, None);
    }

    #[test]
    fn extracts_structured_response_field_and_conversation_id() {
        let result = json!({
            "result": {
                "content": [{ "type": "text", "text": "{\"response\":\"done\",\"conversationId\":\"abc-1\"}" }]
            }
        });
        let (text, cid) = extract_response(&result);
        assert_eq!(text.as_deref(), Some("done"));
        assert_eq!(cid.as_deref(), Some("abc-1"));
    }

    #[test]
    fn falls_back_to_meta_conversation_id() {
        let result = json!({
            "result": {
                "content": [{ "type": "text", "text": "plain" }],
                "_meta": { "conversationId": "meta-1" }
            }
        });
        let (_, cid) = extract_response(&result);
        assert_eq!(cid.as_deref(), Some("meta-1"));
    }
}
