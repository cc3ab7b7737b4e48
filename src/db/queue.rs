// src/db/queue.rs
// Delivery queue operations (spec.md §4.1, §4.11). The queue is consulted
// whenever a message's target is offline; QueueProcessor drains it once the
// target reconnects and sweeps it on a timer for retries.

use super::types::QueueEntry;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub fn enqueue(conn: &Connection, message_id: &str, target: AssistantId, priority: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO queue_entries (message_id, target, priority) VALUES (?1, ?2, ?3)
         ON CONFLICT(message_id) DO NOTHING",
        params![message_id, target.as_str(), priority],
    )?;
    Ok(())
}

/// Entries ready for delivery to `target`, highest priority and oldest first.
pub fn due_for_target(conn: &Connection, target: AssistantId, limit: i64) -> rusqlite::Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, target, priority, attempts, max_attempts, next_attempt, created_at
         FROM queue_entries
         WHERE target = ?1 AND next_attempt <= datetime('now') AND attempts < max_attempts
         ORDER BY priority DESC, next_attempt ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![target.as_str(), limit], row_to_entry)?;
    rows.collect()
}

/// All entries whose `next_attempt` has passed, across both targets — used
/// by the periodic sweep (spec.md §4.11).
pub fn due_all(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, target, priority, attempts, max_attempts, next_attempt, created_at
         FROM queue_entries
         WHERE next_attempt <= datetime('now')
         ORDER BY priority DESC, next_attempt ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], row_to_entry)?;
    rows.collect()
}

pub fn get(conn: &Connection, id: i64) -> rusqlite::Result<Option<QueueEntry>> {
    conn.query_row(
        "SELECT id, message_id, target, priority, attempts, max_attempts, next_attempt, created_at
         FROM queue_entries WHERE id = ?1",
        params![id],
        row_to_entry,
    )
    .optional()
}

/// Bump `attempts` and push `next_attempt` out using exponential backoff:
/// `delay = min(30 * 2^attempts, 3600)` seconds (spec.md §4.11).
pub fn increment_attempts(conn: &Connection, id: i64) -> rusqlite::Result<i64> {
    let attempts: i64 = conn.query_row(
        "SELECT attempts FROM queue_entries WHERE id = ?1",
        params![id],
        |r| r.get(0),
    )?;
    let delay_secs = backoff_delay_secs(attempts);
    let next_attempts = attempts + 1;
    conn.execute(
        "UPDATE queue_entries SET attempts = ?1, next_attempt = datetime('now', ?2) WHERE id = ?3",
        params![next_attempts, format!("+{delay_secs} seconds"), id],
    )?;
    Ok(next_attempts)
}

/// Exponential backoff in seconds: `min(30 * 2^attempts, 3600)`.
pub fn backoff_delay_secs(attempts: i64) -> i64 {
    let base = 30i64.saturating_mul(1i64.checked_shl(attempts.max(0) as u32).unwrap_or(i64::MAX));
    base.min(3600)
}

pub fn remove(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM queue_entries WHERE id = ?1", params![id])?;
    Ok(())
}

/// Remove (and return) all entries that have exhausted `max_attempts`.
pub fn clear_exhausted(conn: &Connection) -> rusqlite::Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, target, priority, attempts, max_attempts, next_attempt, created_at
         FROM queue_entries WHERE attempts >= max_attempts",
    )?;
    let exhausted: Vec<QueueEntry> = stmt.query_map([], row_to_entry)?.collect::<rusqlite::Result<_>>()?;
    conn.execute("DELETE FROM queue_entries WHERE attempts >= max_attempts", [])?;
    Ok(exhausted)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get(0)?,
        message_id: row.get(1)?,
        target: row.get(2)?,
        priority: row.get(3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        next_attempt: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{conversations, messages};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::run_all_migrations(&conn).unwrap();
        conversations::create(
            &conn,
            conversations::NewConversation { id: "conv-1", title: None, project: None, created_by: AssistantId::Claude, metadata: None },
        )
        .unwrap();
        messages::create(
            &conn,
            messages::NewMessage {
                id: "msg-1",
                conversation_id: "conv-1",
                sender: AssistantId::Claude,
                target: AssistantId::Codex,
                content: "hello",
                message_type: "message",
                priority: "normal",
                response_to_id: None,
                metadata: None,
            },
        )
        .unwrap();
        conn
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay_secs(0), 30);
        assert_eq!(backoff_delay_secs(1), 60);
        assert_eq!(backoff_delay_secs(2), 120);
        assert_eq!(backoff_delay_secs(10), 3600);
    }

    #[test]
    fn enqueue_is_idempotent_per_message() {
        let conn = conn();
        enqueue(&conn, "msg-1", AssistantId::Codex, 0).unwrap();
        enqueue(&conn, "msg-1", AssistantId::Codex, 0).unwrap();
        let due = due_for_target(&conn, AssistantId::Codex, 10).unwrap();
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn increment_attempts_schedules_delay_from_pre_increment_count() {
        let conn = conn();
        enqueue(&conn, "msg-1", AssistantId::Codex, 0).unwrap();
        let entry = due_for_target(&conn, AssistantId::Codex, 10).unwrap().remove(0);

        let attempts = increment_attempts(&conn, entry.id).unwrap();
        assert_eq!(attempts, 1);
        let updated = get(&conn, entry.id).unwrap().unwrap();
        assert_eq!(updated.attempts, 1);
        let delay: i64 = conn
            .query_row(
                "SELECT CAST((julianday(next_attempt) - julianday('now')) * 86400 AS INTEGER) FROM queue_entries WHERE id = ?1",
                params![entry.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!((25..=35).contains(&delay), "expected ~30s delay for the first retry, got {delay}");

        let attempts = increment_attempts(&conn, entry.id).unwrap();
        assert_eq!(attempts, 2);
        let delay: i64 = conn
            .query_row(
                "SELECT CAST((julianday(next_attempt) - julianday('now')) * 86400 AS INTEGER) FROM queue_entries WHERE id = ?1",
                params![entry.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!((55..=65).contains(&delay), "expected ~60s delay for the second retry, got {delay}");
    }

    #[test]
    fn exhausted_entries_are_removed() {
        let conn = conn();
        enqueue(&conn, "msg-1", AssistantId::Codex, 0).unwrap();
        let entry = due_for_target(&conn, AssistantId::Codex, 10).unwrap().remove(0);
        conn.execute("UPDATE queue_entries SET attempts = max_attempts WHERE id = ?1", params![entry.id]).unwrap();
        let exhausted = clear_exhausted(&conn).unwrap();
        assert_eq!(exhausted.len(), 1);
        assert!(get(&conn, entry.id).unwrap().is_none());
    }
}
