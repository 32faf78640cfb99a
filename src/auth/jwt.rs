//! Signed Session Tokens
//! Mission: Issue and verify HS256 tokens binding an account email to an expiry

use crate::auth::models::{Account, Claims};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;
use uuid::Uuid;

/// Default validity window: 7 days
pub const DEFAULT_SESSION_TTL_SECS: i64 = 7 * 24 * 3600;

/// Token signer and verifier
pub struct TokenSigner {
    secret: String,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: String, ttl_secs: i64) -> Self {
        Self { secret, ttl_secs }
    }

    /// Issue a token for an account. Returns the token and its absolute
    /// expiry as unix seconds. The jti claim keeps token strings unique
    /// across same-second issuances.
    pub fn issue(&self, account: &Account) -> Result<(String, i64)> {
        let now = Utc::now().timestamp();
        let expires_at = now + self.ttl_secs;

        let claims = Claims {
            sub: account.email.clone(),
            iat: now as usize,
            exp: expires_at as usize,
            jti: Uuid::new_v4().simple().to_string(),
        };

        debug!(
            "Issuing token for {} (expires in {}s)",
            account.email, self.ttl_secs
        );

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to sign session token")?;

        Ok((token, expires_at))
    }

    /// Verify signature and expiry claim, returning the embedded claims
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0; // a token is valid iff exp > now, exactly

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .context("Invalid or expired token")?;

        Ok(data.claims)
    }
}
