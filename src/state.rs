// src/state.rs
// Shared application state handed to every axum handler (spec.md §4.2/§4.4).

use crate::config::BridgeConfig;
use crate::db::Database;
use crate::dispatcher::Dispatcher;
use crate::event_log::EventLog;
use crate::identity::AssistantId;
use crate::knowledge_graph::KnowledgeGraphClient;
use crate::queue_processor::QueueProcessor;
use crate::registry::ClientRegistry;
use crate::subprocess::{SubprocessPeerClient, SubprocessPeerExec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A live streamable-HTTP session (spec.md §4.4). `assistant` is `None` when
/// the initializing request carried no identifiable `x-client-id`/user-agent
/// /query hint (spec.md §4.5) — the session still exists so the handshake
/// completes, but identity-requiring tool calls fail with "Unknown client".
pub struct Session {
    pub id: String,
    pub assistant: Option<AssistantId>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub db: Arc<Database>,
    pub registry: Arc<ClientRegistry>,
    pub event_log: Arc<EventLog>,
    pub knowledge_graph: Arc<KnowledgeGraphClient>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue_processor: Arc<QueueProcessor>,
    pub sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl AppState {
    pub async fn new(config: Arc<BridgeConfig>) -> anyhow::Result<Self> {
        let db = Arc::new(Database::open(&config.db_path).await?);
        let registry = Arc::new(ClientRegistry::new());
        let event_log = Arc::new(EventLog::new(
            std::time::Duration::from_secs(config.event_log_ttl_secs),
            config.event_log_cap,
        ));
        let knowledge_graph = Arc::new(KnowledgeGraphClient::new(config.kg_url.clone(), config.port));

        let peer_client = Arc::new(SubprocessPeerClient::new(config.clone()));
        let peer_exec = Arc::new(SubprocessPeerExec::new(config.clone(), db.clone()));
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), registry.clone(), peer_client, peer_exec, config.codex_mcp_enabled));

        let queue_processor = Arc::new(QueueProcessor::new(
            db.clone(),
            registry.clone(),
            config.queue_poll_interval_ms,
            config.queue_sweep_interval_secs,
        ));
        queue_processor.spawn_sweep();
        queue_processor.spawn_poll();

        Ok(Self {
            config,
            db,
            registry,
            event_log,
            knowledge_graph,
            dispatcher,
            queue_processor,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register a newly initialized session, taking over from any previous
    /// live session for the same assistant (spec.md §4.4 step 6).
    pub async fn register_session(&self, session_id: String, assistant: AssistantId) {
        self.registry.set_online(assistant, session_id.clone()).await;
        {
            let id = assistant;
            let sid = Some(session_id.clone());
            let _ = self.db.interact(move |conn| {
                crate::db::clients::set_status(conn, id, "online", sid.as_deref())?;
                Ok(())
            }).await;
        }
        self.sessions.write().await.insert(session_id.clone(), Arc::new(Session { id: session_id, assistant: Some(assistant) }));
        self.queue_processor.on_client_online(assistant).await;
    }

    /// Register a session whose caller could not be identified. It is
    /// tracked so GET/DELETE against its session id still resolve, but it
    /// never touches `ClientRegistry` or `clients.status`.
    pub async fn register_unidentified_session(&self, session_id: String) {
        self.sessions.write().await.insert(session_id.clone(), Arc::new(Session { id: session_id, assistant: None }));
    }

    /// Tear down a session (DELETE /mcp or connection drop). Only clears
    /// online status if this session is still the registry's current one
    /// for its assistant — a stale close must not clobber a newer session.
    pub async fn close_session(&self, session_id: &str) {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            let Some(assistant) = session.assistant else { return };
            let cleared = self.registry.set_offline_if_current(assistant, session_id).await;
            if cleared {
                let _ = self.db.interact(move |conn| {
                    crate::db::clients::set_status(conn, assistant, "offline", None)?;
                    Ok(())
                }).await;
            }
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Close every live session. Called on graceful shutdown.
    pub async fn close_all_sessions(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close_session(&id).await;
        }
    }
}
