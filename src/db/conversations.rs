// src/db/conversations.rs
// Store operations on the `conversations` table (spec.md §4.1).

use super::types::Conversation;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub struct NewConversation<'a> {
    pub id: &'a str,
    pub title: Option<&'a str>,
    pub project: Option<&'a str>,
    pub created_by: AssistantId,
    pub metadata: Option<&'a str>,
}

pub fn create(conn: &Connection, new: NewConversation) -> rusqlite::Result<Conversation> {
    conn.execute(
        "INSERT INTO conversations (id, title, project, created_by, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![new.id, new.title, new.project, new.created_by.as_str(), new.metadata],
    )?;
    get(conn, new.id)?.ok_or_else(|| rusqlite::Error::QueryReturnedNoRows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        "SELECT id, title, project, status, created_by, created_at, updated_at,
                summary, metadata, closed_at
         FROM conversations WHERE id = ?1",
        params![id],
        row_to_conversation,
    )
    .optional()
}

pub fn list(
    conn: &Connection,
    status: Option<&str>,
    project: Option<&str>,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<Conversation>> {
    let mut sql = String::from(
        "SELECT id, title, project, status, created_by, created_at, updated_at,
                summary, metadata, closed_at
         FROM conversations WHERE 1 = 1",
    );
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if project.is_some() {
        sql.push_str(" AND project = ?");
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT ? OFFSET ?");

    let mut stmt = conn.prepare(&sql)?;
    let mut dyn_params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(s) = &status {
        dyn_params.push(s);
    }
    if let Some(p) = &project {
        dyn_params.push(p);
    }
    dyn_params.push(&limit);
    dyn_params.push(&offset);

    let rows = stmt.query_map(dyn_params.as_slice(), row_to_conversation)?;
    rows.collect()
}

pub fn set_status(conn: &Connection, id: &str, status: &str) -> rusqlite::Result<()> {
    let closed = matches!(status, "completed" | "archived");
    conn.execute(
        "UPDATE conversations
         SET status = ?1, updated_at = datetime('now'),
             closed_at = CASE WHEN ?2 THEN datetime('now') ELSE closed_at END
         WHERE id = ?3",
        params![status, closed, id],
    )?;
    Ok(())
}

pub fn set_summary(conn: &Connection, id: &str, summary: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE conversations SET summary = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![summary, id],
    )?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        project: row.get(2)?,
        status: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        summary: row.get(7)?,
        metadata: row.get(8)?,
        closed_at: row.get(9)?,
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
    fn create_and_get_roundtrip() {
        let conn = conn();
        let created = create(
            &conn,
            NewConversation {
                id: "conv-1",
                title: Some("bridge design"),
                project: None,
                created_by: AssistantId::Claude,
                metadata: None,
            },
        )
        .unwrap();
        assert_eq!(created.status, "active");
        let fetched = get(&conn, "conv-1").unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("bridge design"));
    }

    #[test]
    fn set_status_closes_completed() {
        let conn = conn();
        create(
            &conn,
            NewConversation { id: "conv-2", title: None, project: None, created_by: AssistantId::Codex, metadata: None },
        )
        .unwrap();
        set_status(&conn, "conv-2", "completed").unwrap();
        let row = get(&conn, "conv-2").unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.closed_at.is_some());
    }

    #[test]
    fn list_paginates_with_offset() {
        let conn = conn();
        for id in ["conv-a", "conv-b", "conv-c"] {
            create(&conn, NewConversation { id, title: None, project: None, created_by: AssistantId::Claude, metadata: None })
                .unwrap();
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
        // Newest (conv-c) first.
        let page1 = list(&conn, None, None, 2, 0).unwrap();
        assert_eq!(page1.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["conv-c", "conv-b"]);

        let page2 = list(&conn, None, None, 2, 2).unwrap();
        assert_eq!(page2.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["conv-a"]);

        let page3 = list(&conn, None, None, 2, 4).unwrap();
        assert!(page3.is_empty());
    }
}
