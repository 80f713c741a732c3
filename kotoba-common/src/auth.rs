//! Credentials: password hashing and bearer access tokens
//!
//! # Architecture
//!
//! - Passwords are stored as Argon2id PHC strings (salt embedded)
//! - Access tokens are compact JWS (`header.claims.signature`, base64url
//!   without padding) signed with HMAC-SHA256
//! - The signing secret comes from configuration, or is generated once and
//!   stored in the `settings` table
//!
//! This module contains ONLY pure functions and database operations.
//! No HTTP framework dependencies; the axum extractor lives in the server crate.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Settings key holding a generated signing secret
pub const TOKEN_SECRET_SETTING: &str = "token_signing_secret";

/// Token type reported to clients
pub const TOKEN_TYPE: &str = "bearer";

// ========================================
// Passwords
// ========================================

/// Hash a password with Argon2id and a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string
///
/// A stored value that is not a valid PHC string never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ========================================
// Access tokens
// ========================================

/// Token validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not three base64url segments of JSON
    #[error("Malformed token: {0}")]
    Malformed(String),
    /// Header names an algorithm other than HS256
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Signature does not match
    #[error("Invalid token signature")]
    InvalidSignature,
    /// `exp` is in the past
    #[error("Token expired at {expired_at}")]
    Expired { expired_at: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    pub user_id: i64,
    pub username: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

/// Issues and verifies HS256 access tokens
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, lifetime_hours: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            lifetime: Duration::hours(lifetime_hours),
        }
    }

    /// Token lifetime in seconds
    pub fn lifetime_seconds(&self) -> i64 {
        self.lifetime.num_seconds()
    }

    /// Issue a token for a user, valid from now
    pub fn issue(&self, user_id: i64, username: &str) -> Result<String> {
        self.issue_at(user_id, username, Utc::now())
    }

    /// Issue a token as of `now`
    pub fn issue_at(&self, user_id: i64, username: &str, now: DateTime<Utc>) -> Result<String> {
        let header = TokenHeader {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: username.to_string(),
            user_id,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        let signature = self.mac(signing_input.as_bytes())?.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify a token against the current time
    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature, algorithm and expiry as of `now`
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };

        let header: TokenHeader = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::Malformed(format!("signature: {}", e)))?;
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        self.mac(signing_input.as_bytes())
            .map_err(|e| TokenError::Malformed(e.to_string()))?
            .verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired {
                expired_at: claims.exp,
            });
        }

        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("HMAC key rejected: {}", e)))?;
        mac.update(data);
        Ok(mac)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> std::result::Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("base64: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("json: {}", e)))
}

// ========================================
// Signing secret management
// ========================================

/// Load the token signing secret from the settings table, generating one if absent
///
/// The generated value is 32 random bytes, base64url encoded. `INSERT OR IGNORE`
/// followed by a re-read keeps concurrent first starts consistent.
pub async fn load_or_create_token_secret(db: &SqlitePool) -> Result<String> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(TOKEN_SECRET_SETTING)
            .fetch_optional(db)
            .await?
            .flatten();

    if let Some(secret) = existing.filter(|s| !s.is_empty()) {
        return Ok(secret);
    }

    let generated = generate_secret();
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(TOKEN_SECRET_SETTING)
        .bind(&generated)
        .execute(db)
        .await?;

    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(TOKEN_SECRET_SETTING)
        .fetch_one(db)
        .await?;

    info!("Generated token signing secret and stored it in settings");
    stored.ok_or_else(|| Error::Internal("Token signing secret missing after insert".to_string()))
}

fn generate_secret() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
