//! Account Storage
//! Mission: Securely store and verify account credentials with SQLite

use crate::auth::db::Db;
use crate::auth::models::Account;
use crate::auth::password::{hash_password, verify_password};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use std::fmt;
use tracing::info;

/// Account storage over the shared auth database
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

/// Failure modes of account creation
#[derive(Debug)]
pub enum AccountCreateError {
    DuplicateEmail,
    Storage(anyhow::Error),
}

impl fmt::Display for AccountCreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountCreateError::DuplicateEmail => write!(f, "Email already registered"),
            AccountCreateError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for AccountCreateError {}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        company: row.get(4)?,
        created_at: row.get(5)?,
        last_login: row.get(6)?,
    })
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a new account. The unique index on email decides duplicate
    /// races: exactly one concurrent insert wins.
    pub fn create_account(
        &self,
        name: &str,
        email: &str,
        password: &str,
        company: Option<&str>,
    ) -> Result<Account, AccountCreateError> {
        let password_hash = hash_password(password).map_err(AccountCreateError::Storage)?;
        let created_at = Utc::now().to_rfc3339();

        let conn = self.db.lock();
        let result = conn.execute(
            "INSERT INTO users (name, email, password_hash, company, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, email, password_hash, company, created_at],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                info!("✅ Created account: {} (id {})", email, id);
                Ok(Account {
                    id,
                    name: name.to_string(),
                    email: email.to_string(),
                    password_hash,
                    company: company.map(|c| c.to_string()),
                    created_at,
                    last_login: None,
                })
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AccountCreateError::DuplicateEmail)
            }
            Err(e) => Err(AccountCreateError::Storage(
                anyhow::Error::new(e).context("Failed to insert account"),
            )),
        }
    }

    /// Look up an account by email
    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, password_hash, company, created_at, last_login
             FROM users WHERE email = ?1",
        )?;

        match stmt.query_row(params![email], row_to_account) {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to query account by email"),
        }
    }

    /// Verify credentials and return the account when they match. Unknown
    /// email and wrong password are indistinguishable to the caller.
    /// Updates last_login on success.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<Account>> {
        let Some(mut account) = self.find_by_email(email)? else {
            return Ok(None);
        };

        if !verify_password(password, &account.password_hash)? {
            return Ok(None);
        }

        let last_login = Utc::now().to_rfc3339();
        {
            let conn = self.db.lock();
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![last_login, account.id],
            )
            .context("Failed to update last_login")?;
        }
        account.last_login = Some(last_login);

        Ok(Some(account))
    }

    /// Total number of accounts
    pub fn count(&self) -> Result<i64> {
        let conn = self.db.lock();
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count accounts")
    }
}
