// src/db/messages.rs
// Store operations on the `messages` table, including the FTS5 search index
// (spec.md §4.1, §4.6).

use super::types::Message;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender: AssistantId,
    pub target: AssistantId,
    pub content: &'a str,
    pub message_type: &'a str,
    pub priority: &'a str,
    pub response_to_id: Option<&'a str>,
    pub metadata: Option<&'a str>,
}

pub fn create(conn: &Connection, new: NewMessage) -> rusqlite::Result<Message> {
    conn.execute(
        "INSERT INTO messages
            (id, conversation_id, sender, target, content, message_type,
             priority, response_to_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new.id,
            new.conversation_id,
            new.sender.as_str(),
            new.target.as_str(),
            new.content,
            new.message_type,
            new.priority,
            new.response_to_id,
            new.metadata,
        ],
    )?;
    get(conn, new.id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(&format!("{SELECT_MESSAGE} WHERE id = ?1"), params![id], row_to_message).optional()
}

pub fn list_for_conversation(conn: &Connection, conversation_id: &str, limit: i64) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!("{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY created_at ASC LIMIT ?2"))?;
    let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
    rows.collect()
}

/// Paged variant of [`list_for_conversation`], used by the `get_history`
/// tool (spec.md §4.6).
pub fn list_for_conversation_paged(
    conn: &Connection,
    conversation_id: &str,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<Message>> {
    let mut stmt =
        conn.prepare(&format!("{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY created_at ASC LIMIT ?2 OFFSET ?3"))?;
    let rows = stmt.query_map(params![conversation_id, limit, offset], row_to_message)?;
    rows.collect()
}

/// The most recent `limit` messages of a conversation, returned in
/// chronological (ascending) order — used to build dispatcher context
/// windows (spec.md §4.9 step 4).
pub fn recent_for_conversation(conn: &Connection, conversation_id: &str, limit: i64) -> rusqlite::Result<Vec<Message>> {
    let sql = format!(
        "SELECT * FROM ({SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT ?2)
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
    rows.collect()
}

/// First message that responds to `message_id`, by creation order (earliest
/// response wins — spec.md Open Question resolution, see DESIGN.md).
pub fn get_response_to(conn: &Connection, message_id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("{SELECT_MESSAGE} WHERE response_to_id = ?1 ORDER BY created_at ASC LIMIT 1"),
        params![message_id],
        row_to_message,
    )
    .optional()
}

pub fn update_status(conn: &Connection, id: &str, status: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE messages SET status = ?1, updated_at = datetime('now'),
            delivered_at = CASE WHEN ?1 IN ('delivered','read','responded') AND delivered_at IS NULL
                                 THEN datetime('now') ELSE delivered_at END,
            read_at = CASE WHEN ?1 IN ('read','responded') AND read_at IS NULL
                            THEN datetime('now') ELSE read_at END
         WHERE id = ?2",
        params![status, id],
    )?;
    Ok(())
}

pub fn search(conn: &Connection, conversation_id: Option<&str>, query: &str, limit: i64) -> rusqlite::Result<Vec<Message>> {
    let sql = if conversation_id.is_some() {
        format!(
            "{SELECT_MESSAGE} WHERE conversation_id = ?1
             AND rowid IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?2)
             ORDER BY created_at DESC LIMIT ?3"
        )
    } else {
        format!(
            "{SELECT_MESSAGE} WHERE rowid IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?1)
             ORDER BY created_at DESC LIMIT ?2"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = if let Some(cid) = conversation_id {
        stmt.query_map(params![cid, query, limit], row_to_message)?
    } else {
        stmt.query_map(params![query, limit], row_to_message)?
    };
    rows.collect()
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sender, target, content, message_type,
        priority, status, response_to_id, created_at, updated_at,
        delivered_at, read_at, metadata
     FROM messages";

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        target: row.get(3)?,
        content: row.get(4)?,
        message_type: row.get(5)?,
        priority: row.get(6)?,
        status: row.get(7)?,
        response_to_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        delivered_at: row.get(11)?,
        read_at: row.get(12)?,
        metadata: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::conversations::{self, NewConversation};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::run_all_migrations(&conn).unwrap();
        conversations::create(
            &conn,
            NewConversation { id: "conv-1", title: None, project: None, created_by: AssistantId::Claude, metadata: None },
        )
        .unwrap();
        conn
    }

    #[test]
    fn create_and_fetch_response_chain() {
        let conn = conn();
        let request = create(
            &conn,
            NewMessage {
                id: "msg-1",
                conversation_id: "conv-1",
                sender: AssistantId::Claude,
                target: AssistantId::Codex,
                content: "please review this diff",
                message_type: "review_request",
                priority: "normal",
                response_to_id: None,
                metadata: None,
            },
        )
        .unwrap();
        assert!(get_response_to(&conn, &request.id).unwrap().is_none());

        create(
            &conn,
            NewMessage {
                id: "msg-2",
                conversation_id: "conv-1",
                sender: AssistantId::Codex,
                target: AssistantId::Claude,
                content: "looks good",
                message_type: "review_response",
                priority: "normal",
                response_to_id: Some(&request.id),
                metadata: None,
            },
        )
        .unwrap();

        let response = get_response_to(&conn, &request.id).unwrap().unwrap();
        assert_eq!(response.id, "msg-2");
    }

    #[test]
    fn status_transitions_stamp_timestamps() {
        let conn = conn();
        create(
            &conn,
            NewMessage {
                id: "msg-3",
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
        update_status(&conn, "msg-3", "delivered").unwrap();
        let m = get(&conn, "msg-3").unwrap().unwrap();
        assert!(m.delivered_at.is_some());
        assert!(m.read_at.is_none());
    }

    #[test]
    fn create_bumps_conversation_updated_at() {
        let conn = conn();
        let before = conversations::get(&conn, "conv-1").unwrap().unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_secs(1));
        create(
            &conn,
            NewMessage {
                id: "msg-touch",
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
        let after = conversations::get(&conn, "conv-1").unwrap().unwrap().updated_at;
        assert!(after > before);
    }

    #[test]
    fn fts_search_finds_content() {
        let conn = conn();
        create(
            &conn,
            NewMessage {
                id: "msg-4",
                conversation_id: "conv-1",
                sender: AssistantId::Claude,
                target: AssistantId::Codex,
                content: "investigate the dispatcher backoff bug",
                message_type: "message",
                priority: "normal",
                response_to_id: None,
                metadata: None,
            },
        )
        .unwrap();
        let results = search(&conn, None, "dispatcher", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "msg-4");
    }
}
