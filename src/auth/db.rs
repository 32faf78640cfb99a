//! Auth database bootstrap.
//!
//! One long-lived WAL connection shared by the account and session stores,
//! acquired per operation under a mutex.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

pub type Db = Arc<Mutex<Connection>>;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    company TEXT,
    created_at TEXT NOT NULL,
    last_login TEXT
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    token TEXT UNIQUE NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

-- Sweep queries scan by expiry
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
"#;

/// Open (or create) the auth database and apply the schema.
pub fn open_auth_db(db_path: &str) -> Result<Db> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

    let conn = Connection::open_with_flags(db_path, flags)
        .with_context(|| format!("Failed to open auth database at {}", db_path))?;

    conn.execute_batch(SCHEMA_SQL)
        .context("Failed to initialize auth schema")?;

    // Verify WAL mode is active
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap_or_default();

    if journal_mode.to_lowercase() != "wal" {
        warn!("WAL mode not active, journal_mode = {}", journal_mode);
    }

    info!("🔐 Auth database initialized at: {}", db_path);

    Ok(Arc::new(Mutex::new(conn)))
}
