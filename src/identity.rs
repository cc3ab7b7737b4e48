// src/identity.rs
// Assistant identity: the closed two-party set {claude, codex} and how a
// caller's identity is derived from an inbound HTTP request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of assistants this system brokers between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantId {
    Claude,
    Codex,
}

impl AssistantId {
    pub fn as_str(self) -> &'static str {
        match self {
            AssistantId::Claude => "claude",
            AssistantId::Codex => "codex",
        }
    }

    pub fn other(self) -> AssistantId {
        match self {
            AssistantId::Claude => AssistantId::Codex,
            AssistantId::Codex => AssistantId::Claude,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(AssistantId::Claude),
            "codex" => Some(AssistantId::Codex),
            _ => None,
        }
    }

    pub fn all() -> [AssistantId; 2] {
        [AssistantId::Claude, AssistantId::Codex]
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AssistantId::Claude => "Claude Code CLI",
            AssistantId::Codex => "Codex CLI",
        }
    }
}

impl fmt::Display for AssistantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the calling assistant's identity from request metadata.
///
/// Derivation order, first hit wins:
/// 1. `x-client-id` header equal to `claude` or `codex`.
/// 2. `user-agent` substring match.
/// 3. `client` query parameter equal to `claude` or `codex`.
///
/// Returns `None` when no source yields an exact match — callers that
/// require identity must then fail with "Unknown client" (spec §4.5).
pub fn derive_identity(
    header_client_id: Option<&str>,
    user_agent: Option<&str>,
    query: &HashMap<String, String>,
) -> Option<AssistantId> {
    if let Some(id) = header_client_id.and_then(AssistantId::parse) {
        return Some(id);
    }

    if let Some(ua) = user_agent {
        if ua.contains("claude-code") || ua.contains("Claude") {
            return Some(AssistantId::Claude);
        }
        if ua.contains("codex") || ua.contains("Codex") {
            return Some(AssistantId::Codex);
        }
    }

    if let Some(client) = query.get("client") {
        return AssistantId::parse(client);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wins_over_user_agent() {
        let q = HashMap::new();
        let id = derive_identity(Some("codex"), Some("Claude-Code/1.0"), &q);
        assert_eq!(id, Some(AssistantId::Codex));
    }

    #[test]
    fn user_agent_substring_match() {
        let q = HashMap::new();
        assert_eq!(
            derive_identity(None, Some("claude-code/2.1 (macOS)"), &q),
            Some(AssistantId::Claude)
        );
        assert_eq!(derive_identity(None, Some("Codex-CLI/0.9"), &q), Some(AssistantId::Codex));
    }

    #[test]
    fn falls_back_to_query_param() {
        let mut q = HashMap::new();
        q.insert("client".to_string(), "codex".to_string());
        assert_eq!(derive_identity(None, None, &q), Some(AssistantId::Codex));
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let q = HashMap::new();
        assert_eq!(derive_identity(None, Some("curl/8.0"), &q), None);
    }

    #[test]
    fn only_exact_literals_accepted_in_header() {
        let q = HashMap::new();
        assert_eq!(derive_identity(Some("Claude"), None, &q), None);
        assert_eq!(derive_identity(Some("claude"), None, &q), Some(AssistantId::Claude));
    }
}
