// src/db/types.rs
// Data structures returned by database operations (spec.md §3)

use crate::identity::AssistantId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Online,
    Offline,
    Busy,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Online => "online",
            ClientStatus::Offline => "offline",
            ClientStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => ClientStatus::Online,
            "busy" => ClientStatus::Busy,
            _ => ClientStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Pending,
    Completed,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Pending => "pending",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ConversationStatus::Pending,
            "completed" => ConversationStatus::Completed,
            "archived" => ConversationStatus::Archived,
            _ => ConversationStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    ResearchRequest,
    ResearchResponse,
    ReviewRequest,
    ReviewResponse,
    ContextShare,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::ResearchRequest => "research_request",
            MessageType::ResearchResponse => "research_response",
            MessageType::ReviewRequest => "review_request",
            MessageType::ReviewResponse => "review_response",
            MessageType::ContextShare => "context_share",
            MessageType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "research_request" => MessageType::ResearchRequest,
            "research_response" => MessageType::ResearchResponse,
            "review_request" => MessageType::ReviewRequest,
            "review_response" => MessageType::ReviewResponse,
            "context_share" => MessageType::ContextShare,
            "system" => MessageType::System,
            _ => MessageType::Message,
        }
    }

    pub fn is_response(self) -> bool {
        matches!(self, MessageType::ResearchResponse | MessageType::ReviewResponse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }

    /// Integer priority used for queue ordering: urgent=2, high=1, normal=0.
    pub fn as_int(self) -> i64 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Urgent => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Read,
    Responded,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Responded => "responded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "responded" => MessageStatus::Responded,
            _ => MessageStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationType {
    SubprocessExec,
    PeerMcp,
}

impl InvocationType {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationType::SubprocessExec => "subprocess_exec",
            InvocationType::PeerMcp => "peer_mcp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl InvocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationStatus::Pending => "pending",
            InvocationStatus::Running => "running",
            InvocationStatus::Completed => "completed",
            InvocationStatus::Failed => "failed",
            InvocationStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    File,
    Snippet,
    Entity,
    MemoryItem,
    Url,
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextType::File => "file",
            ContextType::Snippet => "snippet",
            ContextType::Entity => "entity",
            ContextType::MemoryItem => "memory_item",
            ContextType::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "snippet" => ContextType::Snippet,
            "entity" => ContextType::Entity,
            "memory_item" => ContextType::MemoryItem,
            "url" => ContextType::Url,
            _ => ContextType::File,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientRow {
    pub id: String,
    pub display_name: String,
    pub status: String,
    pub session_id: Option<String>,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub project: Option<String>,
    pub status: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub summary: Option<String>,
    pub metadata: Option<String>,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub target: String,
    pub content: String,
    pub message_type: String,
    pub priority: String,
    pub status: String,
    pub response_to_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub metadata: Option<String>,
}

impl Message {
    pub fn sender_id(&self) -> Option<AssistantId> {
        AssistantId::parse(&self.sender)
    }

    pub fn target_id(&self) -> Option<AssistantId> {
        AssistantId::parse(&self.target)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub message_id: String,
    pub target: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_attempt: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub id: String,
    pub target: String,
    pub message_id: String,
    pub invocation_type: String,
    pub status: String,
    pub command: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedContext {
    pub id: String,
    pub conversation_id: Option<String>,
    pub context_type: String,
    pub content: String,
    pub description: Option<String>,
    pub shared_by: String,
    pub created_at: String,
}
