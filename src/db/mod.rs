// src/db/mod.rs
// Async connection pool + the Store (spec.md §4.1): all durable state lives
// behind this module. See `pool.run()`/`pool.interact()` doc comments below
// for which to reach for in new code.

pub mod clients;
pub mod conversations;
pub mod invocations;
pub mod messages;
pub mod queue;
pub mod schema;
pub mod shared_context;
pub mod types;

use crate::error::{BridgeError, Result};
use anyhow::Context;
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Database pool wrapper. The sole entry point for durable state.
pub struct Database {
    pool: Pool,
    path: Option<PathBuf>,
}

enum Storage {
    File(PathBuf),
    InMemory,
}

impl Database {
    /// Open a pooled database at the given path, creating the parent
    /// directory and running migrations if needed.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        Self::open_internal(Storage::File(path.to_path_buf())).await
    }

    /// Open a pooled, shared-cache in-memory database. Used by tests.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        Self::open_internal(Storage::InMemory).await
    }

    async fn open_internal(storage: Storage) -> anyhow::Result<Self> {
        let (conn_str, path, hook) = match storage {
            Storage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().into_owned();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), hook)
            }
            Storage::InMemory => {
                let uri = format!("file:peerbridge_memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
                let hook = make_memory_post_create_hook();
                (uri, None, hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("failed to build connection pool")?;

        let db = Self { pool, path };
        db.interact(|conn| {
            schema::run_all_migrations(conn)?;
            Ok(())
        })
        .await?;

        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure on a pooled connection, returning `anyhow::Result`.
    /// Prefer this in bootstrap/background-task code.
    pub async fn interact<F, R>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce(&Connection) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await.context("failed to get connection from pool")?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, converting errors to
    /// [`BridgeError`]. Prefer this in tool handlers.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<BridgeError> + Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| BridgeError::Other(format!("failed to get connection: {e}")))?;
        conn.interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| BridgeError::Other(format!("database error: {e}")))?
    }
}

fn ensure_parent_directory(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;
                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path, perms) {
                        tracing::warn!("failed to set database file permissions to 0600: {e}");
                    }
                }
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into()))
        })
    })
}

fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into()))
        })
    })
}

/// WAL mode for concurrency, FK enforcement, a 5s busy timeout, and NORMAL
/// synchronous (safe with WAL, cheaper than FULL).
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().await.expect("open");
        let rows: i64 = db
            .interact(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM clients", [], |r| r.get(0))?)
            })
            .await
            .expect("query");
        assert_eq!(rows, 2);
    }
}
