// src/dispatcher.rs
// C8: the core routing decision for `send_message` (spec.md §4.9).

use crate::db::types::{Message, Priority};
use crate::db::{conversations, messages, queue, Database};
use crate::identity::AssistantId;
use crate::persona::{self, Persona};
use crate::registry::ClientRegistry;
use crate::subprocess::{SubprocessPeerClient, SubprocessPeerExec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

pub struct Dispatcher {
    db: Arc<Database>,
    registry: Arc<ClientRegistry>,
    peer_client: Arc<SubprocessPeerClient>,
    peer_exec: Arc<SubprocessPeerExec>,
    codex_mcp_enabled: bool,
}

pub struct SendMessageOptions {
    pub sender: AssistantId,
    pub target: AssistantId,
    pub conversation_id: Option<String>,
    pub content: String,
    pub priority: Priority,
    pub message_type: String,
    pub wait_for_response: bool,
    pub timeout_ms: u64,
    pub agent: Option<String>,
}

pub struct SendMessageResult {
    pub conversation_id: String,
    pub message_id: String,
    /// `delivered` | `enqueued` | `responded`
    pub status: String,
    pub response: Option<Message>,
    pub invoked_via_mcp: bool,
    pub invocation_error: Option<String>,
}

const CONTEXT_WINDOW: i64 = 20;
const MAX_BACKOFF_MS: u64 = 1000;

struct CodexInvocationOutcome {
    response: Option<Message>,
    invoked_via_mcp: bool,
    invocation_error: Option<String>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ClientRegistry>,
        peer_client: Arc<SubprocessPeerClient>,
        peer_exec: Arc<SubprocessPeerExec>,
        codex_mcp_enabled: bool,
    ) -> Self {
        Self { db, registry, peer_client, peer_exec, codex_mcp_enabled }
    }

    pub async fn send_message(&self, opts: SendMessageOptions) -> crate::Result<SendMessageResult> {
        let conversation_id = match &opts.conversation_id {
            Some(id) => {
                let id = id.clone();
                let existing = {
                    let id = id.clone();
                    self.db.interact(move |conn| Ok(conversations::get(conn, &id)?)).await?
                };
                let Some(existing) = existing else {
                    return Err(crate::BridgeError::NotFound(format!("conversation {id} not found")));
                };
                if existing.status == "archived" {
                    return Err(crate::BridgeError::Forbidden(format!("conversation {id} is archived")));
                }
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let sender = opts.sender;
                let new_id = id.clone();
                self.db
                    .interact(move |conn| {
                        conversations::create(
                            conn,
                            conversations::NewConversation {
                                id: &new_id,
                                title: None,
                                project: None,
                                created_by: sender,
                                metadata: None,
                            },
                        )?;
                        Ok(())
                    })
                    .await?;
                id
            }
        };

        let message_id = Uuid::new_v4().to_string();
        {
            let conversation_id = conversation_id.clone();
            let message_id = message_id.clone();
            let sender = opts.sender;
            let target = opts.target;
            let content = opts.content.clone();
            let message_type = opts.message_type.clone();
            let priority = opts.priority.as_str().to_string();
            self.db
                .interact(move |conn| {
                    messages::create(
                        conn,
                        messages::NewMessage {
                            id: &message_id,
                            conversation_id: &conversation_id,
                            sender,
                            target,
                            content: &content,
                            message_type: &message_type,
                            priority: &priority,
                            response_to_id: None,
                            metadata: None,
                        },
                    )?;
                    Ok(())
                })
                .await?;
        }

        let mut status = "pending".to_string();
        let mut response = None;
        let mut invoked_via_mcp = false;
        let mut invocation_error = None;

        if self.registry.is_online(opts.target).await {
            status = "delivered".to_string();
            let message_id = message_id.clone();
            self.db.interact(move |conn| Ok(messages::update_status(conn, &message_id, "delivered")?)).await?;
            info!(target = %opts.target, "message delivered to online peer");
        } else if opts.target == AssistantId::Codex {
            let outcome = self.invoke_codex(&conversation_id, &message_id, &opts).await?;
            if let Some(resp) = outcome.response {
                status = "responded".to_string();
                response = Some(resp);
            }
            invoked_via_mcp = outcome.invoked_via_mcp;
            invocation_error = outcome.invocation_error;
        } else {
            let priority_int = opts.priority.as_int();
            let message_id_for_queue = message_id.clone();
            let target = opts.target;
            self.db
                .interact(move |conn| Ok(queue::enqueue(conn, &message_id_for_queue, target, priority_int)?))
                .await?;
            status = "enqueued".to_string();
            debug!(target = %opts.target, "target offline, message enqueued");
        }

        if opts.wait_for_response && response.is_none() {
            let message_id = message_id.clone();
            response = self.wait_for_response(&message_id, opts.timeout_ms).await?;
        }

        Ok(SendMessageResult { conversation_id, message_id, status, response, invoked_via_mcp, invocation_error })
    }

    /// Poll `get_response_to_message` with adaptive backoff: starts at
    /// 100ms, multiplies by 1.5 up to a 1000ms ceiling, until `timeout_ms`
    /// total elapsed (spec.md §4.9 step 5).
    pub async fn wait_for_response(&self, message_id: &str, timeout_ms: u64) -> crate::Result<Option<Message>> {
        let deadline = Duration::from_millis(timeout_ms);
        let start = Instant::now();
        let mut delay_ms = 100u64;

        loop {
            let mid = message_id.to_string();
            let found = self.db.interact(move |conn| Ok(messages::get_response_to(conn, &mid)?)).await?;
            if found.is_some() {
                return Ok(found);
            }
            if start.elapsed() >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_sub(start.elapsed());
            let sleep_for = Duration::from_millis(delay_ms).min(remaining);
            tokio::time::sleep(sleep_for).await;
            delay_ms = ((delay_ms as f64) * 1.5).min(MAX_BACKOFF_MS as f64) as u64;
        }
    }

    async fn invoke_codex(
        &self,
        conversation_id: &str,
        message_id: &str,
        opts: &SendMessageOptions,
    ) -> crate::Result<CodexInvocationOutcome> {
        let persona: &'static Persona = match &opts.agent {
            Some(name) => persona::by_name(name).unwrap_or(persona::select_persona(&opts.content)),
            None => persona::select_persona(&opts.content),
        };

        let context_messages = {
            let conversation_id = conversation_id.to_string();
            self.db
                .interact(move |conn| Ok(messages::recent_for_conversation(conn, &conversation_id, CONTEXT_WINDOW)?))
                .await?
        };

        let context = render_context(&context_messages);
        let prompt = if context.is_empty() {
            opts.content.clone()
        } else {
            format!("{context}\nNew message:\n{}", opts.content)
        };

        let response_message_type = derive_response_type(&opts.message_type);

        // Tier A: persistent peer channel (spec.md §6 CODEX_MCP_ENABLED).
        if self.codex_mcp_enabled {
            if let Some(text) = self.peer_client.send_message(&prompt, Some(message_id), persona).await {
                let response = self
                    .create_response_message(conversation_id, message_id, opts, &response_message_type, &text)
                    .await?;
                return Ok(CodexInvocationOutcome { response: Some(response), invoked_via_mcp: true, invocation_error: None });
            }
        }

        // Tier B: one-shot exec fallback.
        let invocation_id = Uuid::new_v4().to_string();
        let outcome = self
            .peer_exec
            .run(
                &invocation_id,
                message_id,
                opts.target,
                &opts.message_type,
                &prompt,
                opts.timeout_ms,
                true,
            )
            .await
            .map_err(|e| crate::BridgeError::Subprocess(e.to_string()))?;

        if let Some(text) = outcome.response_text {
            let response = self
                .create_response_message(conversation_id, message_id, opts, &response_message_type, &text)
                .await?;
            return Ok(CodexInvocationOutcome { response: Some(response), invoked_via_mcp: false, invocation_error: None });
        }

        Ok(CodexInvocationOutcome {
            response: None,
            invoked_via_mcp: false,
            invocation_error: Some(
                outcome.invocation_error.unwrap_or_else(|| "invocation failed with no output".to_string()),
            ),
        })
    }

    async fn create_response_message(
        &self,
        conversation_id: &str,
        original_message_id: &str,
        opts: &SendMessageOptions,
        response_message_type: &str,
        content: &str,
    ) -> crate::Result<Message> {
        let response_id = Uuid::new_v4().to_string();
        let conversation_id = conversation_id.to_string();
        let original_message_id_owned = original_message_id.to_string();
        let sender = opts.target;
        let target = opts.sender;
        let content_owned = content.to_string();
        let message_type_owned = response_message_type.to_string();

        let response = self
            .db
            .interact(move |conn| {
                let response = messages::create(
                    conn,
                    messages::NewMessage {
                        id: &response_id,
                        conversation_id: &conversation_id,
                        sender,
                        target,
                        content: &content_owned,
                        message_type: &message_type_owned,
                        priority: "normal",
                        response_to_id: Some(&original_message_id_owned),
                        metadata: None,
                    },
                )?;
                messages::update_status(conn, &original_message_id_owned, "responded")?;
                Ok(response)
            })
            .await?;
        Ok(response)
    }
}

fn derive_response_type(request_type: &str) -> String {
    match request_type {
        "research_request" => "research_response".to_string(),
        "review_request" => "review_response".to_string(),
        _ => "message".to_string(),
    }
}

fn render_context(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.sender, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_response_type_from_request() {
        assert_eq!(derive_response_type("research_request"), "research_response");
        assert_eq!(derive_response_type("review_request"), "review_response");
        assert_eq!(derive_response_type("message"), "message");
    }

    #[test]
    fn renders_context_with_sender_tags() {
        let messages = vec![];
        assert_eq!(render_context(&messages), "");
    }

    #[tokio::test]
    async fn send_message_rejects_archived_conversation() {
        use crate::config::BridgeConfig;
        use crate::db::conversations::{self, NewConversation};
        use crate::db::Database;
        use crate::registry::ClientRegistry;
        use crate::subprocess::{SubprocessPeerClient, SubprocessPeerExec};

        let db = Arc::new(Database::open_in_memory().await.unwrap());
        db.interact(|conn| {
            conversations::create(
                conn,
                NewConversation {
                    id: "conv-archived",
                    title: None,
                    project: None,
                    created_by: AssistantId::Claude,
                    metadata: None,
                },
            )?;
            conversations::set_status(conn, "conv-archived", "archived")?;
            Ok(())
        })
        .await
        .unwrap();

        let registry = Arc::new(ClientRegistry::new());
        let mut config = BridgeConfig::from_env();
        config.db_path = std::path::PathBuf::from(":memory:");
        let config = Arc::new(config);
        let peer_client = Arc::new(SubprocessPeerClient::new(config.clone()));
        let peer_exec = Arc::new(SubprocessPeerExec::new(config, db.clone()));
        let dispatcher = Dispatcher::new(db, registry, peer_client, peer_exec, true);

        let result = dispatcher
            .send_message(SendMessageOptions {
                sender: AssistantId::Claude,
                target: AssistantId::Codex,
                conversation_id: Some("conv-archived".to_string()),
                content: "hello".to_string(),
                priority: Priority::Normal,
                message_type: "message".to_string(),
                wait_for_response: false,
                timeout_ms: 1000,
                agent: None,
            })
            .await;

        assert!(matches!(result, Err(crate::BridgeError::Forbidden(_))));
    }
}
