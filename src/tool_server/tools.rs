// src/tool_server/tools.rs
// Handler bodies for every tool named in spec.md §4.6. Each returns the
// success payload as a `Value`, or an `Err(String)` that the dispatch layer
// wraps into the `{content, isError:true}` envelope.

use super::schemas::*;
use crate::db::types::Priority;
use crate::db::{conversations, messages, shared_context};
use crate::dispatcher::SendMessageOptions;
use crate::identity::AssistantId;
use crate::tool_server::ToolServer;
use serde_json::{json, Value};

pub async fn who_am_i(server: &ToolServer) -> Result<Value, String> {
    let Some(id) = server.identity else {
        return Err("Unknown client".to_string());
    };
    Ok(json!({ "client_id": id.as_str(), "description": id.display_name() }))
}

pub async fn create_conversation(server: &ToolServer, params: CreateConversationParams) -> Result<Value, String> {
    let sender = server.require_identity()?;
    let id = uuid::Uuid::new_v4().to_string();
    let title = params.title.clone();
    let project = params.project.clone();
    let conv = server
        .db
        .interact(move |conn| {
            Ok(conversations::create(
                conn,
                conversations::NewConversation {
                    id: &id,
                    title: title.as_deref(),
                    project: project.as_deref(),
                    created_by: sender,
                    metadata: None,
                },
            )?)
        })
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::to_value(conv).unwrap_or(Value::Null))
}

pub async fn list_conversations(server: &ToolServer, params: ListConversationsParams) -> Result<Value, String> {
    let status = match params.status.as_str() {
        "all" => None,
        other => Some(other.to_string()),
    };
    let project: Option<String> = None;
    let limit = params.limit.clamp(1, 100);
    let offset = params.offset.max(0);
    let rows = server
        .db
        .interact(move |conn| Ok(conversations::list(conn, status.as_deref(), project.as_deref(), limit, offset)?))
        .await
        .map_err(|e| e.to_string())?;
    let rows: Vec<Value> = rows.into_iter().map(|c| serde_json::to_value(c).unwrap_or(Value::Null)).collect();
    Ok(json!({ "conversations": rows }))
}

pub async fn get_conversation(server: &ToolServer, params: GetConversationParams) -> Result<Value, String> {
    let id = params.conversation_id.clone();
    let conv = server.db.interact(move |conn| Ok(conversations::get(conn, &id)?)).await.map_err(|e| e.to_string())?;
    match conv {
        Some(conv) => Ok(serde_json::to_value(conv).unwrap_or(Value::Null)),
        None => Err(format!("conversation {} not found", params.conversation_id)),
    }
}

pub async fn close_conversation(server: &ToolServer, params: CloseConversationParams) -> Result<Value, String> {
    let id = params.conversation_id.clone();
    let existing =
        server.db.interact({ let id = id.clone(); move |conn| Ok(conversations::get(conn, &id)?) }).await.map_err(|e| e.to_string())?;
    let Some(existing) = existing else {
        return Err(format!("conversation {id} not found"));
    };

    let summary = params.summary.clone();
    server
        .db
        .interact({
            let id = id.clone();
            let summary = summary.clone();
            move |conn| {
                conversations::set_status(conn, &id, "completed")?;
                if let Some(summary) = &summary {
                    conversations::set_summary(conn, &id, summary)?;
                }
                Ok(())
            }
        })
        .await
        .map_err(|e| e.to_string())?;

    if params.sync {
        if let Some(summary) = &summary {
            server.knowledge_graph.sync_entity(json!({
                "type": "conversation_summary",
                "conversation_id": id,
                "title": existing.title,
                "summary": summary,
            }));
        }
    }

    let updated = server.db.interact(move |conn| Ok(conversations::get(conn, &id)?)).await.map_err(|e| e.to_string())?;
    Ok(serde_json::to_value(updated).unwrap_or(Value::Null))
}

pub async fn send_message(server: &ToolServer, params: SendMessageParams) -> Result<Value, String> {
    let sender = server.require_identity()?;
    let target = AssistantId::parse(&params.target).ok_or_else(|| format!("unknown target {}", params.target))?;
    if target == sender {
        return Err("cannot send a message to self".to_string());
    }

    let result = server
        .dispatcher
        .send_message(SendMessageOptions {
            sender,
            target,
            conversation_id: params.conversation_id,
            content: params.content,
            priority: Priority::parse(&params.priority),
            message_type: "message".to_string(),
            wait_for_response: params.wait_for_response,
            timeout_ms: params.timeout_ms.min(300_000),
            agent: params.agent,
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "conversation_id": result.conversation_id,
        "message_id": result.message_id,
        "status": result.status,
        "response": result.response,
        "invoked_via_mcp": result.invoked_via_mcp,
        "invocation_error": result.invocation_error,
    }))
}

pub async fn get_response(server: &ToolServer, params: GetResponseParams) -> Result<Value, String> {
    let timeout_ms = params.timeout_ms.min(300_000);
    let response = server.dispatcher.wait_for_response(&params.message_id, timeout_ms).await.map_err(|e| e.to_string())?;
    match response {
        Some(msg) => Ok(json!({ "response": msg, "timeout": false })),
        None => Ok(json!({ "response": Value::Null, "timeout": true })),
    }
}

pub async fn get_history(server: &ToolServer, params: GetHistoryParams) -> Result<Value, String> {
    let limit = params.limit.clamp(1, 500);
    let conversation_id = params.conversation_id;
    let rows = server
        .db
        .interact(move |conn| Ok(messages::list_for_conversation_paged(conn, &conversation_id, limit, params.offset.max(0))?))
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "messages": rows }))
}

pub async fn mark_message_read(server: &ToolServer, params: MarkMessageReadParams) -> Result<Value, String> {
    let caller = server.require_identity()?;
    let id = params.message_id.clone();
    let message = server.db.interact(move |conn| Ok(messages::get(conn, &id)?)).await.map_err(|e| e.to_string())?;
    let Some(message) = message else {
        return Err(format!("message {} not found", params.message_id));
    };
    if message.target_id() != Some(caller) {
        return Err("only the message's target may mark it read".to_string());
    }

    let id = params.message_id.clone();
    server.db.interact(move |conn| Ok(messages::update_status(conn, &id, "read")?)).await.map_err(|e| e.to_string())?;

    let id = params.message_id;
    let updated = server.db.interact(move |conn| Ok(messages::get(conn, &id)?)).await.map_err(|e| e.to_string())?;
    Ok(serde_json::to_value(updated).unwrap_or(Value::Null))
}

pub async fn share_context(server: &ToolServer, params: ShareContextParams) -> Result<Value, String> {
    let sender = server.require_identity()?;
    let id = uuid::Uuid::new_v4().to_string();
    let context = server
        .db
        .interact(move |conn| {
            Ok(shared_context::create(
                conn,
                shared_context::NewSharedContext {
                    id: &id,
                    conversation_id: params.conversation_id.as_deref(),
                    context_type: &params.context_type,
                    content: &params.content,
                    description: params.description.as_deref(),
                    shared_by: sender,
                },
            )?)
        })
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::to_value(context).unwrap_or(Value::Null))
}

pub async fn get_shared_context(server: &ToolServer, params: GetSharedContextParams) -> Result<Value, String> {
    let id = params.context_id.clone();
    let context = server.db.interact(move |conn| Ok(shared_context::get(conn, &id)?)).await.map_err(|e| e.to_string())?;
    match context {
        Some(context) => Ok(serde_json::to_value(context).unwrap_or(Value::Null)),
        None => Err(format!("shared context {} not found", params.context_id)),
    }
}

pub async fn list_shared_context(server: &ToolServer, params: ListSharedContextParams) -> Result<Value, String> {
    let limit = params.limit.clamp(1, 500);
    let rows = server
        .db
        .interact(move |conn| Ok(shared_context::list(conn, params.conversation_id.as_deref(), limit)?))
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "items": rows }))
}

const RESEARCH_DEPTH_TAILS: &[(&str, &str)] = &[
    ("shallow", "Keep this brief: a quick scan, not a deep dive."),
    ("medium", "Investigate thoroughly enough to be confident in your findings."),
    ("deep", "Do an exhaustive investigation; trace root causes, not just symptoms."),
];

fn research_timeout_ms(depth: &str) -> u64 {
    match depth {
        "shallow" => 120_000,
        "deep" => 600_000,
        _ => 300_000,
    }
}

pub async fn delegate_research(server: &ToolServer, params: DelegateResearchParams) -> Result<Value, String> {
    let sender = server.require_identity()?;
    let target = AssistantId::parse(&params.target).ok_or_else(|| format!("unknown target {}", params.target))?;
    if target == sender {
        return Err("cannot delegate research to self".to_string());
    }

    let depth_tail = RESEARCH_DEPTH_TAILS
        .iter()
        .find(|(d, _)| *d == params.depth)
        .map(|(_, tail)| *tail)
        .unwrap_or(RESEARCH_DEPTH_TAILS[1].1);

    let mut prompt = format!("Research request: {}\n\n{}", params.topic, depth_tail);
    if let Some(context) = &params.context {
        prompt.push_str(&format!("\n\nContext:\n{context}"));
    }

    let timeout_ms = research_timeout_ms(&params.depth);
    let result = server
        .dispatcher
        .send_message(SendMessageOptions {
            sender,
            target,
            conversation_id: params.conversation_id,
            content: prompt,
            priority: Priority::Normal,
            message_type: "research_request".to_string(),
            wait_for_response: true,
            timeout_ms,
            agent: None,
        })
        .await
        .map_err(|e| e.to_string())?;

    if params.sync {
        if let Some(response) = &result.response {
            server.knowledge_graph.sync_memory_item(json!({
                "type": "research_response",
                "conversation_id": result.conversation_id,
                "topic": params.topic,
                "content": response.content,
            }));
        }
    }

    Ok(json!({
        "conversation_id": result.conversation_id,
        "message_id": result.message_id,
        "status": result.status,
        "response": result.response,
        "invoked_via_mcp": result.invoked_via_mcp,
        "invocation_error": result.invocation_error,
    }))
}

const REVIEW_TYPE_TAILS: &[(&str, &str)] = &[
    ("code", "Focus on correctness, edge cases, and readability."),
    ("architecture", "Focus on module boundaries, coupling, and long-term maintainability."),
    ("security", "Focus on injection, auth, secrets handling, and trust boundaries."),
    ("performance", "Focus on algorithmic complexity, allocation, and I/O patterns."),
    ("general", "Give a well-rounded review covering whatever stands out."),
];

pub async fn request_review(server: &ToolServer, params: RequestReviewParams) -> Result<Value, String> {
    let sender = server.require_identity()?;
    let target = AssistantId::parse(&params.target).ok_or_else(|| format!("unknown target {}", params.target))?;
    if target == sender {
        return Err("cannot request a review from self".to_string());
    }

    let tail = REVIEW_TYPE_TAILS
        .iter()
        .find(|(t, _)| *t == params.review_type)
        .map(|(_, tail)| *tail)
        .unwrap_or(REVIEW_TYPE_TAILS[4].1);

    let mut prompt = format!("Review request ({}):\n\n{}\n\n{}", params.review_type, params.content, tail);
    if let Some(context) = &params.context {
        prompt.push_str(&format!("\n\nContext:\n{context}"));
    }

    let result = server
        .dispatcher
        .send_message(SendMessageOptions {
            sender,
            target,
            conversation_id: params.conversation_id,
            content: prompt,
            priority: Priority::Normal,
            message_type: "review_request".to_string(),
            wait_for_response: true,
            timeout_ms: 120_000,
            agent: None,
        })
        .await
        .map_err(|e| e.to_string())?;

    if params.sync {
        if let Some(response) = &result.response {
            server.knowledge_graph.sync_memory_item(json!({
                "type": "review_response",
                "conversation_id": result.conversation_id,
                "review_type": params.review_type,
                "content": response.content,
            }));
        }
    }

    Ok(json!({
        "conversation_id": result.conversation_id,
        "message_id": result.message_id,
        "status": result.status,
        "response": result.response,
        "invoked_via_mcp": result.invoked_via_mcp,
        "invocation_error": result.invocation_error,
    }))
}
