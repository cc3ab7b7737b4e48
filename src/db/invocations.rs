// src/db/invocations.rs
// Audit trail for subprocess invocations of a peer assistant (spec.md §3,
// §4.8). One row per subprocess-exec or persistent-peer tool call attempt.

use super::types::Invocation;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub struct NewInvocation<'a> {
    pub id: &'a str,
    pub target: AssistantId,
    pub message_id: &'a str,
    pub invocation_type: &'a str,
    pub command: Option<&'a str>,
}

pub fn create(conn: &Connection, new: NewInvocation) -> rusqlite::Result<Invocation> {
    conn.execute(
        "INSERT INTO invocations (id, target, message_id, invocation_type, command)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![new.id, new.target.as_str(), new.message_id, new.invocation_type, new.command],
    )?;
    get(conn, new.id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Invocation>> {
    conn.query_row(&format!("{SELECT_INVOCATION} WHERE id = ?1"), params![id], row_to_invocation).optional()
}

pub fn mark_running(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE invocations SET status = 'running', started_at = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn mark_finished(
    conn: &Connection,
    id: &str,
    status: &str,
    stdout: Option<&str>,
    stderr: Option<&str>,
    exit_code: Option<i64>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE invocations
         SET status = ?1, stdout = ?2, stderr = ?3, exit_code = ?4, finished_at = datetime('now')
         WHERE id = ?5",
        params![status, stdout, stderr, exit_code, id],
    )?;
    Ok(())
}

pub fn list_for_message(conn: &Connection, message_id: &str) -> rusqlite::Result<Vec<Invocation>> {
    let mut stmt = conn.prepare(&format!("{SELECT_INVOCATION} WHERE message_id = ?1 ORDER BY created_at ASC"))?;
    let rows = stmt.query_map(params![message_id], row_to_invocation)?;
    rows.collect()
}

const SELECT_INVOCATION: &str = "SELECT id, target, message_id, invocation_type, status, command,
        stdout, stderr, exit_code, created_at, started_at, finished_at
     FROM invocations";

fn row_to_invocation(row: &rusqlite::Row) -> rusqlite::Result<Invocation> {
    Ok(Invocation {
        id: row.get(0)?,
        target: row.get(1)?,
        message_id: row.get(2)?,
        invocation_type: row.get(3)?,
        status: row.get(4)?,
        command: row.get(5)?,
        stdout: row.get(6)?,
        stderr: row.get(7)?,
        exit_code: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
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
                content: "review this",
                message_type: "review_request",
                priority: "normal",
                response_to_id: None,
                metadata: None,
            },
        )
        .unwrap();
        conn
    }

    #[test]
    fn lifecycle_transitions() {
        let conn = conn();
        let inv = create(
            &conn,
            NewInvocation {
                id: "inv-1",
                target: AssistantId::Codex,
                message_id: "msg-1",
                invocation_type: "subprocess_exec",
                command: Some("codex exec --output-schema ..."),
            },
        )
        .unwrap();
        assert_eq!(inv.status, "pending");

        mark_running(&conn, "inv-1").unwrap();
        let running = get(&conn, "inv-1").unwrap().unwrap();
        assert_eq!(running.status, "running");
        assert!(running.started_at.is_some());

        mark_finished(&conn, "inv-1", "completed", Some("ok"), None, Some(0)).unwrap();
        let finished = get(&conn, "inv-1").unwrap().unwrap();
        assert_eq!(finished.status, "completed");
        assert_eq!(finished.exit_code, Some(0));
    }
}
