//! Session Storage
//! Mission: Persist issued tokens so revocation and expiry are enforceable
//!
//! Expiry is a query-time predicate; rows are removed only by logout or the
//! periodic sweep.

use crate::auth::db::Db;
use crate::auth::models::{Account, Session};
use anyhow::{Context, Result};
use rusqlite::params;
use tracing::debug;

#[derive(Clone)]
pub struct SessionStore {
    db: Db,
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
    })
}

impl SessionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a freshly issued session
    pub fn insert(
        &self,
        user_id: i64,
        token: &str,
        created_at: i64,
        expires_at: i64,
    ) -> Result<Session> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO sessions (user_id, token, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, token, created_at, expires_at],
        )
        .context("Failed to insert session")?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            user_id,
            token: token.to_string(),
            created_at,
            expires_at,
        })
    }

    /// Find a live session by token. Expired rows resolve to None.
    pub fn find_valid(&self, token: &str, now: i64) -> Result<Option<Session>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, token, created_at, expires_at
             FROM sessions WHERE token = ?1 AND expires_at > ?2",
        )?;

        match stmt.query_row(params![token, now], row_to_session) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to query session by token"),
        }
    }

    /// Resolve a live session straight to its account in one join
    pub fn account_for_token(&self, token: &str, now: i64) -> Result<Option<Account>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, u.email, u.password_hash, u.company, u.created_at, u.last_login
             FROM users u
             JOIN sessions s ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
        )?;

        let account = stmt.query_row(params![token, now], |row| {
            Ok(Account {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                company: row.get(4)?,
                created_at: row.get(5)?,
                last_login: row.get(6)?,
            })
        });

        match account {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to resolve account for token"),
        }
    }

    /// Delete a session by token. Idempotent: revoking an unknown or
    /// already-revoked token is a no-op.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let conn = self.db.lock();
        let removed = conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;

        if removed > 0 {
            debug!("Session revoked");
        }
        Ok(())
    }

    /// Delete all sessions with expires_at <= now. Accounts are never touched.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            .context("Failed to purge expired sessions")
    }

    /// Number of session rows, live or expired
    pub fn count(&self) -> Result<i64> {
        let conn = self.db.lock();
        conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .context("Failed to count sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::db::open_auth_db;
    use crate::auth::user_store::UserStore;
    use tempfile::NamedTempFile;

    fn create_test_stores() -> (UserStore, SessionStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = open_auth_db(temp_file.path().to_str().unwrap()).unwrap();
        (UserStore::new(db.clone()), SessionStore::new(db), temp_file)
    }

    #[test]
    fn test_valid_session_resolves_until_expiry() {
        let (users, sessions, _temp) = create_test_stores();
        let account = users
            .create_account("A", "a@x.com", "abcdef", None)
            .unwrap();

        sessions.insert(account.id, "tok-1", 1_000, 2_000).unwrap();

        // Valid strictly before expires_at
        assert!(sessions.find_valid("tok-1", 1_999).unwrap().is_some());
        // Invalid at and after the expiry instant
        assert!(sessions.find_valid("tok-1", 2_000).unwrap().is_none());
        assert!(sessions.find_valid("tok-1", 3_000).unwrap().is_none());
    }

    #[test]
    fn test_account_join_resolves_owner() {
        let (users, sessions, _temp) = create_test_stores();
        let account = users
            .create_account("A", "a@x.com", "abcdef", None)
            .unwrap();
        sessions.insert(account.id, "tok-1", 1_000, 2_000).unwrap();

        let resolved = sessions.account_for_token("tok-1", 1_500).unwrap().unwrap();
        assert_eq!(resolved.id, account.id);
        assert_eq!(resolved.email, "a@x.com");

        assert!(sessions.account_for_token("tok-1", 2_500).unwrap().is_none());
        assert!(sessions.account_for_token("unknown", 1_500).unwrap().is_none());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let (users, sessions, _temp) = create_test_stores();
        let account = users
            .create_account("A", "a@x.com", "abcdef", None)
            .unwrap();
        sessions.insert(account.id, "tok-1", 1_000, 2_000).unwrap();

        sessions.revoke("tok-1").unwrap();
        assert!(sessions.find_valid("tok-1", 1_500).unwrap().is_none());

        // Revoking again, or revoking something unknown, is a no-op
        sessions.revoke("tok-1").unwrap();
        sessions.revoke("never-issued").unwrap();
    }

    #[test]
    fn test_purge_removes_only_expired_rows() {
        let (users, sessions, _temp) = create_test_stores();
        let account = users
            .create_account("A", "a@x.com", "abcdef", None)
            .unwrap();

        sessions.insert(account.id, "expired-1", 100, 200).unwrap();
        sessions.insert(account.id, "expired-2", 100, 900).unwrap();
        sessions.insert(account.id, "live", 100, 5_000).unwrap();

        let purged = sessions.purge_expired(1_000).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(sessions.count().unwrap(), 1);
        assert!(sessions.find_valid("live", 1_000).unwrap().is_some());

        // Accounts are untouched by the sweep
        assert_eq!(users.count().unwrap(), 1);
    }
}
