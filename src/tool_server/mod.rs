// src/tool_server/mod.rs
// C5: schema-validated tool registry (spec.md §4.6). Translates a named
// tool invocation + raw JSON arguments into a store/dispatcher call and
// serializes the result into the wire envelope every tool result uses:
// `{content:[{type:"text", text:<json>}], isError?:bool}`.

pub mod schemas;
pub mod tools;

use crate::db::Database;
use crate::dispatcher::Dispatcher;
use crate::identity::AssistantId;
use crate::knowledge_graph::KnowledgeGraphClient;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

/// One `ToolServer` is constructed per tool call, bound to the calling
/// session's identity (spec.md §3: "Session ... tool_server"). It is cheap
/// to build — every field is a clone of a shared `Arc`.
pub struct ToolServer {
    pub identity: Option<AssistantId>,
    pub db: Arc<Database>,
    pub knowledge_graph: Arc<KnowledgeGraphClient>,
    pub dispatcher: Arc<Dispatcher>,
}

impl ToolServer {
    pub fn new(
        identity: Option<AssistantId>,
        db: Arc<Database>,
        knowledge_graph: Arc<KnowledgeGraphClient>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { identity, db, knowledge_graph, dispatcher }
    }

    pub fn require_identity(&self) -> Result<AssistantId, String> {
        self.identity.ok_or_else(|| "Unknown client".to_string())
    }

    /// `tools/list` payload: every registered tool's name and schema.
    pub fn list_tools(&self) -> Vec<Value> {
        schemas::all_tool_names()
            .into_iter()
            .map(|name| {
                json!({
                    "name": name,
                    "inputSchema": schemas::schema_for_tool(name).cloned().unwrap_or(Value::Null),
                })
            })
            .collect()
    }

    /// `tools/call` entry point. Validates `arguments` against the named
    /// tool's schema, dispatches, and always returns a well-formed envelope
    /// — handler and validation failures alike become `isError:true` rather
    /// than propagating (spec.md §4.6, §7).
    pub async fn call(&self, name: &str, arguments: Value) -> Value {
        if let Err(e) = schemas::validate(name, &arguments) {
            return error_envelope(e);
        }
        match self.dispatch(name, arguments).await {
            Ok(value) => ok_envelope(value),
            Err(e) => error_envelope(e),
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value, String> {
        use tools::*;
        match name {
            "who_am_i" => who_am_i(self).await,
            "create_conversation" => create_conversation(self, parse(arguments)?).await,
            "list_conversations" => list_conversations(self, parse(arguments)?).await,
            "get_conversation" => get_conversation(self, parse(arguments)?).await,
            "close_conversation" => close_conversation(self, parse(arguments)?).await,
            "send_message" => send_message(self, parse(arguments)?).await,
            "get_response" => get_response(self, parse(arguments)?).await,
            "get_history" => get_history(self, parse(arguments)?).await,
            "mark_message_read" => mark_message_read(self, parse(arguments)?).await,
            "share_context" => share_context(self, parse(arguments)?).await,
            "get_shared_context" => get_shared_context(self, parse(arguments)?).await,
            "list_shared_context" => list_shared_context(self, parse(arguments)?).await,
            "delegate_research" => delegate_research(self, parse(arguments)?).await,
            "request_review" => request_review(self, parse(arguments)?).await,
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|e| e.to_string())
}

fn ok_envelope(value: Value) -> Value {
    json!({ "content": [{ "type": "text", "text": value.to_string() }] })
}

fn error_envelope(message: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": json!({ "error": message }).to_string() }],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::registry::ClientRegistry;
    use crate::subprocess::{SubprocessPeerClient, SubprocessPeerExec};
    use std::sync::Arc;

    async fn server(identity: Option<AssistantId>) -> ToolServer {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let registry = Arc::new(ClientRegistry::new());
        let kg = Arc::new(KnowledgeGraphClient::new("http://127.0.0.1:3789".to_string(), 3790));
        let mut config = BridgeConfig::from_env();
        config.db_path = std::path::PathBuf::from(":memory:");
        let config = Arc::new(config);
        let peer_client = Arc::new(SubprocessPeerClient::new(config.clone()));
        let peer_exec = Arc::new(SubprocessPeerExec::new(config, db.clone()));
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), registry, peer_client, peer_exec, true));
        ToolServer::new(identity, db, kg, dispatcher)
    }

    #[tokio::test]
    async fn who_am_i_without_identity_errors() {
        let srv = server(None).await;
        let result = srv.call("who_am_i", json!({})).await;
        assert_eq!(result["isError"], json!(true));
    }

    #[tokio::test]
    async fn who_am_i_with_identity_returns_client_id() {
        let srv = server(Some(AssistantId::Claude)).await;
        let result = srv.call("who_am_i", json!({})).await;
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["client_id"], json!("claude"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_envelope() {
        let srv = server(Some(AssistantId::Claude)).await;
        let result = srv.call("not_a_tool", json!({})).await;
        assert_eq!(result["isError"], json!(true));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_dispatch() {
        let srv = server(Some(AssistantId::Claude)).await;
        let result = srv.call("send_message", json!({})).await;
        assert_eq!(result["isError"], json!(true));
    }
}
