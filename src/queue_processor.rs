// src/queue_processor.rs
// C9: background delivery of queued messages (spec.md §4.11). A message is
// queued whenever its target is offline at send time; this component drains
// the queue once the target reconnects, and sweeps it on a timer so retries
// still happen between reconnects.

use crate::db::types::QueueEntry;
use crate::db::{messages, queue, Database};
use crate::identity::AssistantId;
use crate::registry::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DRAIN_BATCH_SIZE: i64 = 50;
const SWEEP_BATCH_SIZE: i64 = 200;
const DEFAULT_MAX_ATTEMPTS: i64 = 5;

pub struct QueueProcessor {
    db: Arc<Database>,
    registry: Arc<ClientRegistry>,
    poll_interval: Duration,
    sweep_interval: Duration,
}

impl QueueProcessor {
    pub fn new(db: Arc<Database>, registry: Arc<ClientRegistry>, poll_interval_ms: u64, sweep_interval_secs: u64) -> Self {
        Self {
            db,
            registry,
            poll_interval: Duration::from_millis(poll_interval_ms),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
        }
    }

    /// Spawn the periodic sweep as a background task. The sweep catches
    /// entries whose `next_attempt` has already passed, independent of any
    /// reconnect event.
    pub fn spawn_sweep(self: &Arc<Self>) {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(processor.sweep_interval);
            loop {
                interval.tick().await;
                if let Err(e) = processor.sweep().await {
                    warn!(error = %e, "queue sweep failed");
                }
            }
        });
    }

    /// Spawn the periodic drain poll (spec.md §4.11): every `poll_interval`,
    /// drain whichever of the two assistants is currently online. This runs
    /// independently of `on_client_online` so a target that reconnected
    /// without going through the transport's session-initialised hook (or
    /// whose immediate drain raced with an enqueue) still gets retried.
    pub fn spawn_poll(self: &Arc<Self>) {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(processor.poll_interval);
            loop {
                interval.tick().await;
                for target in AssistantId::all() {
                    if !processor.registry.is_online(target).await {
                        continue;
                    }
                    if let Err(e) = processor.drain(target).await {
                        warn!(error = %e, target = %target, "queue poll drain failed");
                    }
                }
            }
        });
    }

    /// Called from the transport layer when a session registers as online
    /// for `target` (spec.md §4.4 step 6, §4.11). Drains everything already
    /// due for that target.
    pub async fn on_client_online(&self, target: AssistantId) {
        if let Err(e) = self.drain(target).await {
            warn!(error = %e, target = %target, "queue drain on reconnect failed");
        }
    }

    async fn drain(&self, target: AssistantId) -> anyhow::Result<()> {
        loop {
            let entries = self.db.interact(move |conn| Ok(queue::due_for_target(conn, target, DRAIN_BATCH_SIZE)?)).await?;
            if entries.is_empty() {
                return Ok(());
            }
            let count = entries.len();
            for entry in entries {
                self.deliver_or_retry(entry).await?;
            }
            if count < DRAIN_BATCH_SIZE as usize {
                return Ok(());
            }
            // Give the event loop a chance to breathe between large batches.
            tokio::task::yield_now().await;
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let entries = self.db.interact(move |conn| Ok(queue::due_all(conn, SWEEP_BATCH_SIZE)?)).await?;
        if entries.is_empty() {
            return Ok(());
        }
        debug!(count = entries.len(), "queue sweep found due entries");
        for entry in entries {
            self.deliver_or_retry(entry).await?;
        }
        self.clear_exhausted().await
    }

    async fn deliver_or_retry(&self, entry: QueueEntry) -> anyhow::Result<()> {
        let Some(target) = AssistantId::parse(&entry.target) else {
            warn!(raw = %entry.target, "queue entry with unparseable target, dropping");
            let id = entry.id;
            self.db.interact(move |conn| Ok(queue::remove(conn, id)?)).await?;
            return Ok(());
        };

        if !self.registry.is_online(target).await {
            return Ok(());
        }

        let message_id = entry.message_id.clone();
        let delivered = self
            .db
            .interact(move |conn| Ok(messages::update_status(conn, &message_id, "delivered")?))
            .await;

        let id = entry.id;
        match delivered {
            Ok(()) => {
                self.db.interact(move |conn| Ok(queue::remove(conn, id)?)).await?;
                info!(message_id = %entry.message_id, target = %target, "delivered queued message");
            }
            Err(e) => {
                warn!(error = %e, message_id = %entry.message_id, "failed to mark queued message delivered, retrying later");
                self.db.interact(move |conn| Ok(queue::increment_attempts(conn, id)?)).await?;
            }
        }
        Ok(())
    }

    async fn clear_exhausted(&self) -> anyhow::Result<()> {
        let exhausted = self.db.interact(|conn| Ok(queue::clear_exhausted(conn)?)).await?;
        for entry in &exhausted {
            let message_id = entry.message_id.clone();
            let _ = self
                .db
                .interact(move |conn| Ok(messages::update_status(conn, &message_id, "pending")?))
                .await;
            warn!(
                message_id = %entry.message_id,
                attempts = entry.attempts,
                max_attempts = entry.max_attempts,
                "queue entry exhausted retries, dropping"
            );
        }
        Ok(())
    }
}

pub const fn default_max_attempts() -> i64 {
    DEFAULT_MAX_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::conversations::{self, NewConversation};

    async fn setup() -> (Arc<Database>, Arc<ClientRegistry>) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let registry = Arc::new(ClientRegistry::new());
        db.interact(|conn| {
            conversations::create(
                conn,
                NewConversation { id: "conv-1", title: None, project: None, created_by: AssistantId::Claude, metadata: None },
            )?;
            messages::create(
                conn,
                messages::NewMessage {
                    id: "msg-1",
                    conversation_id: "conv-1",
                    sender: AssistantId::Claude,
                    target: AssistantId::Codex,
                    content: "hi",
                    message_type: "message",
                    priority: "normal",
                    response_to_id: None,
                    metadata: None,
                },
            )?;
            queue::enqueue(conn, "msg-1", AssistantId::Codex, 0)?;
            Ok(())
        })
        .await
        .unwrap();
        (db, registry)
    }

    #[tokio::test]
    async fn drain_delivers_when_target_online() {
        let (db, registry) = setup().await;
        registry.set_online(AssistantId::Codex, "sess-1".to_string()).await;
        let processor = QueueProcessor::new(db.clone(), registry.clone(), 1000, 60);

        processor.on_client_online(AssistantId::Codex).await;

        let remaining = db.interact(|conn| Ok(queue::due_for_target(conn, AssistantId::Codex, 10)?)).await.unwrap();
        assert!(remaining.is_empty());

        let msg = db.interact(|conn| Ok(messages::get(conn, "msg-1")?)).await.unwrap().unwrap();
        assert_eq!(msg.status, "delivered");
    }

    #[tokio::test]
    async fn drain_is_noop_when_target_offline() {
        let (db, registry) = setup().await;
        let processor = QueueProcessor::new(db.clone(), registry.clone(), 1000, 60);

        processor.on_client_online(AssistantId::Claude).await;

        let remaining = db.interact(|conn| Ok(queue::due_for_target(conn, AssistantId::Codex, 10)?)).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn spawn_poll_drains_without_explicit_on_client_online() {
        let (db, registry) = setup().await;
        registry.set_online(AssistantId::Codex, "sess-1".to_string()).await;
        let processor = Arc::new(QueueProcessor::new(db.clone(), registry.clone(), 20, 60));

        processor.spawn_poll();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let remaining = db.interact(|conn| Ok(queue::due_for_target(conn, AssistantId::Codex, 10)?)).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn sweep_clears_exhausted_entries() {
        let (db, registry) = setup().await;
        db.interact(|conn| {
            conn.execute("UPDATE queue_entries SET attempts = max_attempts", [])?;
            Ok(())
        })
        .await
        .unwrap();
        let processor = QueueProcessor::new(db.clone(), registry.clone(), 1000, 60);

        processor.sweep().await.unwrap();

        let remaining = db.interact(|conn| Ok(queue::due_all(conn, 10)?)).await.unwrap();
        assert!(remaining.is_empty());
    }
}
