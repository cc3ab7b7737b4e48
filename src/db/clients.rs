// src/db/clients.rs
// Store operations on the `clients` table (spec.md §4.1).

use super::types::ClientRow;
use crate::identity::AssistantId;
use rusqlite::{params, Connection, OptionalExtension};

pub fn get(conn: &Connection, id: AssistantId) -> rusqlite::Result<Option<ClientRow>> {
    conn.query_row(
        "SELECT id, display_name, status, session_id, last_seen_at, created_at
         FROM clients WHERE id = ?1",
        params![id.as_str()],
        row_to_client,
    )
    .optional()
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<ClientRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, status, session_id, last_seen_at, created_at
         FROM clients ORDER BY id",
    )?;
    let rows = stmt.query_map([], row_to_client)?;
    rows.collect()
}

pub fn set_status(
    conn: &Connection,
    id: AssistantId,
    status: &str,
    session_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE clients SET status = ?1, session_id = ?2, last_seen_at = datetime('now')
         WHERE id = ?3",
        params![status, session_id, id.as_str()],
    )?;
    Ok(())
}

fn row_to_client(row: &rusqlite::Row) -> rusqlite::Result<ClientRow> {
    Ok(ClientRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        status: row.get(2)?,
        session_id: row.get(3)?,
        last_seen_at: row.get(4)?,
        created_at: row.get(5)?,
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
    fn seeded_clients_exist() {
        let conn = conn();
        let clients = list(&conn).unwrap();
        assert_eq!(clients.len(), 2);
        assert!(get(&conn, AssistantId::Claude).unwrap().is_some());
        assert!(get(&conn, AssistantId::Codex).unwrap().is_some());
    }

    #[test]
    fn set_status_updates_session() {
        let conn = conn();
        set_status(&conn, AssistantId::Claude, "online", Some("sess-1")).unwrap();
        let row = get(&conn, AssistantId::Claude).unwrap().unwrap();
        assert_eq!(row.status, "online");
        assert_eq!(row.session_id.as_deref(), Some("sess-1"));
    }
}
