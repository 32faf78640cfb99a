//! Authentication API Endpoints
//! Mission: Provide signup, login, logout, and session verification

use crate::auth::{
    jwt::TokenSigner,
    models::{
        Account, AccountResponse, LoginRequest, LoginResponse, LogoutRequest, LogoutResponse,
        SignupRequest, SignupResponse, VerifySessionResponse,
    },
    session_store::SessionStore,
    user_store::{AccountCreateError, UserStore},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Passwords shorter than this are rejected at signup
pub const MIN_PASSWORD_LEN: usize = 6;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub users: UserStore,
    pub sessions: SessionStore,
    pub signer: Arc<TokenSigner>,
}

impl AuthState {
    pub fn new(users: UserStore, sessions: SessionStore, signer: Arc<TokenSigner>) -> Self {
        Self {
            users,
            sessions,
            signer,
        }
    }

    /// Issue a signed token and persist its session row
    pub fn open_session(&self, account: &Account) -> anyhow::Result<(String, i64)> {
        let (token, expires_at) = self.signer.issue(account)?;
        self.sessions
            .insert(account.id, &token, Utc::now().timestamp(), expires_at)?;
        Ok((token, expires_at))
    }

    /// Resolve a token to its account: signature and expiry claim first,
    /// then the live session row. Revoked tokens fail the second step even
    /// while their signature is still valid.
    pub fn authenticate(&self, token: &str, now: i64) -> anyhow::Result<Option<Account>> {
        if self.signer.decode(token).is_err() {
            return Ok(None);
        }
        self.sessions.account_for_token(token, now)
    }
}

/// Signup endpoint - POST /api/signup
pub async fn signup(
    State(auth): State<AuthState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, AuthApiError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    let account = auth
        .users
        .create_account(
            &payload.name,
            &payload.email,
            &payload.password,
            payload.company.as_deref(),
        )
        .map_err(|e| match e {
            AccountCreateError::DuplicateEmail => AuthApiError::DuplicateEmail,
            AccountCreateError::Storage(e) => {
                warn!("Signup storage failure: {}", e);
                AuthApiError::InternalError
            }
        })?;

    let (token, _expires_at) = auth.open_session(&account).map_err(|e| {
        warn!("Failed to open session: {}", e);
        AuthApiError::InternalError
    })?;

    Ok(Json(SignupResponse {
        token,
        name: account.name,
        email: account.email,
    }))
}

/// Login endpoint - POST /api/login
pub async fn login(
    State(auth): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let account = auth
        .users
        .verify_credentials(&payload.email, &payload.password)
        .map_err(|e| {
            warn!("Login storage failure: {}", e);
            AuthApiError::InternalError
        })?
        .ok_or_else(|| {
            warn!("❌ Failed login attempt: {}", payload.email);
            AuthApiError::InvalidCredentials
        })?;

    let (token, expires_at) = auth.open_session(&account).map_err(|e| {
        warn!("Failed to open session: {}", e);
        AuthApiError::InternalError
    })?;

    info!("🔓 Login successful: {}", account.email);

    Ok(Json(LoginResponse {
        token,
        expires_in: expires_at - Utc::now().timestamp(),
        user: AccountResponse::from_account(&account),
    }))
}

/// Logout endpoint - POST /api/logout
/// Always succeeds; revoking an unknown token is a no-op.
pub async fn logout(
    State(auth): State<AuthState>,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AuthApiError> {
    auth.sessions.revoke(&payload.token).map_err(|e| {
        warn!("Logout storage failure: {}", e);
        AuthApiError::InternalError
    })?;

    Ok(Json(LogoutResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct VerifySessionQuery {
    pub token: String,
}

/// Session check endpoint - GET /api/verify-session?token=...
pub async fn verify_session(
    State(auth): State<AuthState>,
    Query(query): Query<VerifySessionQuery>,
) -> Result<Json<VerifySessionResponse>, AuthApiError> {
    let account = auth
        .authenticate(&query.token, Utc::now().timestamp())
        .map_err(|e| {
            warn!("Session lookup failure: {}", e);
            AuthApiError::InternalError
        })?
        .ok_or(AuthApiError::InvalidSession)?;

    Ok(Json(VerifySessionResponse {
        success: true,
        user: AccountResponse::from_account(&account),
    }))
}

/// Current account endpoint - GET /api/users/me
/// The auth guard has already resolved the account into request extensions.
pub async fn me(Extension(account): Extension<Account>) -> Json<AccountResponse> {
    Json(AccountResponse::from_account(&account))
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    DuplicateEmail,
    WeakPassword,
    InvalidCredentials,
    InvalidSession,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::DuplicateEmail => (StatusCode::BAD_REQUEST, "Email already registered"),
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 6 characters",
            ),
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password")
            }
            AuthApiError::InvalidSession => {
                (StatusCode::UNAUTHORIZED, "Invalid or expired session")
            }
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({ "error": message }));

        (status, body).into_response()
    }
}
