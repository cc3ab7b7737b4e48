// src/registry.rs
// C3: process-local authoritative map of assistant-id -> live session-id.
// The database's `clients.status` column is a stale mirror kept for
// observability (spec.md §4.3); this registry is the single source of truth
// for "is the peer reachable right now".

use crate::identity::AssistantId;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<AssistantId, String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn set_online(&self, id: AssistantId, session_id: String) {
        self.sessions.write().await.insert(id, session_id);
    }

    /// Mark offline only if `session_id` still matches the registered one —
    /// a stale close (e.g. from a superseded session) must not clobber a
    /// newer session's online status.
    pub async fn set_offline_if_current(&self, id: AssistantId, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&id).map(String::as_str) == Some(session_id) {
            sessions.remove(&id);
            true
        } else {
            false
        }
    }

    pub async fn is_online(&self, id: AssistantId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn session_id(&self, id: AssistantId) -> Option<String> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn online_list(&self) -> Vec<AssistantId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Drop every online mapping. Used at shutdown, after every session's
    /// transport has been closed (spec.md §4.4 shutdown hook).
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn online_then_offline() {
        let registry = ClientRegistry::new();
        assert!(!registry.is_online(AssistantId::Claude).await);
        registry.set_online(AssistantId::Claude, "sess-1".to_string()).await;
        assert!(registry.is_online(AssistantId::Claude).await);
        assert_eq!(registry.session_id(AssistantId::Claude).await.as_deref(), Some("sess-1"));

        assert!(registry.set_offline_if_current(AssistantId::Claude, "sess-1").await);
        assert!(!registry.is_online(AssistantId::Claude).await);
    }

    #[tokio::test]
    async fn stale_close_does_not_clobber_newer_session() {
        let registry = ClientRegistry::new();
        registry.set_online(AssistantId::Codex, "sess-1".to_string()).await;
        registry.set_online(AssistantId::Codex, "sess-2".to_string()).await;

        let cleared = registry.set_offline_if_current(AssistantId::Codex, "sess-1").await;
        assert!(!cleared);
        assert!(registry.is_online(AssistantId::Codex).await);
        assert_eq!(registry.session_id(AssistantId::Codex).await.as_deref(), Some("sess-2"));
    }

    #[tokio::test]
    async fn online_list_reflects_registered_sessions() {
        let registry = ClientRegistry::new();
        registry.set_online(AssistantId::Claude, "a".to_string()).await;
        registry.set_online(AssistantId::Codex, "b".to_string()).await;
        let mut online = registry.online_list().await;
        online.sort_by_key(|a| a.as_str());
        assert_eq!(online, vec![AssistantId::Claude, AssistantId::Codex]);
    }
}
