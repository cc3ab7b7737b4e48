// src/db/shared_context.rs
// Store operations on the `shared_context` table (spec.md §3, §4.6's
// share_context/get_shared_context/list_shared_context tools).

use super::types::SharedContext;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub struct NewSharedContext<'a> {
    pub id: &'a str,
    pub conversation_id: Option<&'a str>,
    pub context_type: &'a str,
    pub content: &'a str,
    pub description: Option<&'a str>,
    pub shared_by: AssistantId,
}

pub fn create(conn: &Connection, new: NewSharedContext) -> rusqlite::Result<SharedContext> {
    conn.execute(
        "INSERT INTO shared_context (id, conversation_id, context_type, content, description, shared_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![new.id, new.conversation_id, new.context_type, new.content, new.description, new.shared_by.as_str()],
    )?;
    get(conn, new.id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<SharedContext>> {
    conn.query_row(&format!("{SELECT_CONTEXT} WHERE id = ?1"), params![id], row_to_context).optional()
}

pub fn list(conn: &Connection, conversation_id: Option<&str>, limit: i64) -> rusqlite::Result<Vec<SharedContext>> {
    match conversation_id {
        Some(cid) => {
            let mut stmt = conn.prepare(&format!("{SELECT_CONTEXT} WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT ?2"))?;
            let rows = stmt.query_map(params![cid, limit], row_to_context)?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(&format!("{SELECT_CONTEXT} ORDER BY created_at DESC LIMIT ?1"))?;
            let rows = stmt.query_map(params![limit], row_to_context)?;
            rows.collect()
        }
    }
}

const SELECT_CONTEXT: &str =
    "SELECT id, conversation_id, context_type, content, description, shared_by, created_at FROM shared_context";

fn row_to_context(row: &rusqlite::Row) -> rusqlite::Result<SharedContext> {
    Ok(SharedContext {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        context_type: row.get(2)?,
        content: row.get(3)?,
        description: row.get(4)?,
        shared_by: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn create_and_list_without_conversation() {
        let conn = conn();
        create(
            &conn,
            NewSharedContext {
                id: "ctx-1",
                conversation_id: None,
                context_type: "file",
                content: "src/dispatcher.rs",
                description: Some("routing logic"),
                shared_by: AssistantId::Claude,
            },
        )
        .unwrap();
        let all = list(&conn, None, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].context_type, "file");
    }
}
