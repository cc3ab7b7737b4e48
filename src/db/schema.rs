// src/db/schema.rs
// Database schema and migrations (spec.md §4.1, §6)

use rusqlite::Connection;

/// Run all schema setup and migrations. Idempotent: safe to call on every
/// connection open.
pub fn run_all_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

pub const SCHEMA: &str = r#"
-- =======================================
-- Clients: one row per assistant, pre-seeded
-- =======================================
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY CHECK (id IN ('claude','codex')),
    display_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'offline' CHECK (status IN ('online','offline','busy')),
    session_id TEXT,
    last_seen_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO clients (id, display_name, status) VALUES
    ('claude', 'Claude Code CLI', 'offline'),
    ('codex', 'Codex CLI', 'offline');

-- =======================================
-- Conversations
-- =======================================
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT,
    project TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','pending','completed','archived')),
    created_by TEXT NOT NULL CHECK (created_by IN ('claude','codex')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    summary TEXT,
    metadata TEXT,
    closed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_conversations_status_updated
    ON conversations(status, updated_at DESC);

-- =======================================
-- Messages
-- =======================================
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    sender TEXT NOT NULL CHECK (sender IN ('claude','codex')),
    target TEXT NOT NULL CHECK (target IN ('claude','codex')),
    content TEXT NOT NULL CHECK (length(content) > 0),
    message_type TEXT NOT NULL DEFAULT 'message' CHECK (
        message_type IN ('message','research_request','research_response','review_request','review_response','context_share','system')
    ),
    priority TEXT NOT NULL DEFAULT 'normal' CHECK (priority IN ('normal','high','urgent')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','delivered','read','responded')),
    response_to_id TEXT REFERENCES messages(id),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    delivered_at TEXT,
    read_at TEXT,
    metadata TEXT,
    CHECK (sender != target)
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
    ON messages(conversation_id, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_messages_response_to
    ON messages(response_to_id);
CREATE INDEX IF NOT EXISTS idx_messages_target_status
    ON messages(target, status);

-- Every message insert bumps its conversation's updated_at (spec.md §3).
CREATE TRIGGER IF NOT EXISTS messages_touch_conversation AFTER INSERT ON messages BEGIN
    UPDATE conversations SET updated_at = datetime('now') WHERE id = new.conversation_id;
END;

-- Full-text index over messages.content, porter tokenized.
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    content='messages',
    content_rowid='rowid',
    tokenize='porter'
);

CREATE TRIGGER IF NOT EXISTS messages_fts_insert AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_update AFTER UPDATE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
    INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_delete AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
END;

-- =======================================
-- Delivery queue
-- =======================================
CREATE TABLE IF NOT EXISTS queue_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
    target TEXT NOT NULL CHECK (target IN ('claude','codex')),
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 5,
    next_attempt TEXT NOT NULL DEFAULT (datetime('now')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_queue_target_next
    ON queue_entries(target, next_attempt);

-- =======================================
-- Invocations (subprocess audit trail)
-- =======================================
CREATE TABLE IF NOT EXISTS invocations (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL CHECK (target IN ('claude','codex')),
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    invocation_type TEXT NOT NULL CHECK (invocation_type IN ('subprocess_exec','peer_mcp')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','running','completed','failed','timeout')),
    command TEXT,
    stdout TEXT,
    stderr TEXT,
    exit_code INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_invocations_message ON invocations(message_id);

-- =======================================
-- Shared context
-- =======================================
CREATE TABLE IF NOT EXISTS shared_context (
    id TEXT PRIMARY KEY,
    conversation_id TEXT REFERENCES conversations(id) ON DELETE CASCADE,
    context_type TEXT NOT NULL CHECK (context_type IN ('file','snippet','entity','memory_item','url')),
    content TEXT NOT NULL,
    description TEXT,
    shared_by TEXT NOT NULL CHECK (shared_by IN ('claude','codex')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_shared_context_conversation ON shared_context(conversation_id);
"#;
