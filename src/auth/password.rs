//! Password Hashing
//! Mission: One-way credential hashing with per-call random salts

use anyhow::{Context, Result};
use bcrypt::DEFAULT_COST;

/// Hash a plaintext password. The salt is random per call and embedded in
/// the digest, so equal plaintexts produce different digests.
pub fn hash_password(plaintext: &str) -> Result<String> {
    bcrypt::hash(plaintext, DEFAULT_COST).context("Failed to hash password")
}

/// Verify a plaintext password against a stored digest. This is the only
/// comparison surface; digests are never inverted.
pub fn verify_password(plaintext: &str, digest: &str) -> Result<bool> {
    bcrypt::verify(plaintext, digest).context("Failed to verify password")
}
