//! Append-only SQLite store for extracted links.

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::{domain::ExtractedLink, errors::Error, ports::LinkSink, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS links (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id     TEXT,
        message_id  INTEGER,
        link        TEXT,
        timestamp   DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_links_chat_message
        ON links(chat_id, message_id);
";

/// Handle to the `links` table.
///
/// Clones share one connection; every call is serialized on it, so ids are
/// handed out in commit order. `close` drops the connection for all clones.
#[derive(Clone)]
pub struct LinkStore {
    conn: Arc<Mutex<Option<Connection>>>,
    location: Arc<str>,
}

impl LinkStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::StoreUnavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;

        // WAL keeps readers (e.g. `linkmon links`) from blocking the writer.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(unavailable)?;

        Self::with_connection(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, location: String) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            location: location.into(),
        };
        store.ensure_schema()?;
        info!(location = %store.location, "link store opened");
        Ok(store)
    }

    /// Create the `links` table if absent. Safe to call on every start.
    pub fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA).map_err(unavailable))?;
        debug!("links table created or already present");
        Ok(())
    }

    /// Append one row; the timestamp is assigned by the database. Returns the new id.
    pub fn insert(&self, channel_id: &str, message_id: i64, link: &str) -> Result<i64> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO links (chat_id, message_id, link) VALUES (?1, ?2, ?3)",
                params![channel_id, message_id, link],
            )
            .map_err(|e| Error::Insert(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(id, channel_id, message_id, link, "link stored");
        Ok(id)
    }

    /// Most recent rows first.
    pub fn recent(&self, limit: u32) -> Result<Vec<ExtractedLink>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, message_id, link, timestamp
                 FROM links ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], row_to_link)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Rows for one message in insertion order.
    pub fn links_for_message(&self, channel_id: &str, message_id: i64) -> Result<Vec<ExtractedLink>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, message_id, link, timestamp
                 FROM links WHERE chat_id = ?1 AND message_id = ?2 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![channel_id, message_id], row_to_link)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
    }

    /// Release the connection. Any later call, including a second close, fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        let conn = {
            let mut guard = self.lock()?;
            guard.take().ok_or(Error::Closed)?
        };
        conn.close()
            .map_err(|(_, e)| Error::External(format!("closing link store: {e}")))?;
        info!(location = %self.location, "link store closed");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| Error::StoreUnavailable(format!("store lock poisoned: {e}")))
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(Error::Closed)?;
        f(conn)
    }
}

#[async_trait]
impl LinkSink for LinkStore {
    async fn append(&self, channel_id: &str, message_id: i64, link: &str) -> Result<i64> {
        let store = self.clone();
        let channel_id = channel_id.to_string();
        let link = link.to_string();
        tokio::task::spawn_blocking(move || store.insert(&channel_id, message_id, &link))
            .await
            .map_err(|e| Error::Insert(format!("insert task failed: {e}")))?
    }

    async fn shutdown(&self) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.close())
            .await
            .map_err(|e| Error::External(format!("close task failed: {e}")))?
    }
}

fn unavailable(e: rusqlite::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExtractedLink> {
    Ok(ExtractedLink {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        message_id: row.get(2)?,
        link: row.get(3)?,
        timestamp: row.get(4)?,
    })
}
