//! Authentication Models
//! Mission: Define account, session, and token data structures

use serde::{Deserialize, Serialize};

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt digest - never serialize
    pub company: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Session row backing an issued token
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (account email)
    pub iat: usize,  // issued-at timestamp
    pub exp: usize,  // expiration timestamp
    pub jti: String, // unique token id
}

/// Signup request body
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub company: Option<String>,
}

/// Signup response
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub token: String,
    pub name: String,
    pub email: String,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64, // seconds until expiration
    pub user: AccountResponse,
}

/// Logout request body
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

/// Logout response
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Verify-session response
#[derive(Debug, Serialize)]
pub struct VerifySessionResponse {
    pub success: bool,
    pub user: AccountResponse,
}

/// Account response (sanitized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

impl AccountResponse {
    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            company: account.company.clone(),
            created_at: account.created_at.clone(),
            last_login: account.last_login.clone(),
        }
    }
}
