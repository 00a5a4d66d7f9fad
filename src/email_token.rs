//! One-time email verification and password reset tokens.
//!
//! The raw token leaves the server only inside an email. The user record
//! holds its SHA-256 digest and an expiry, and both are cleared by the same
//! statement that applies the token's effect.

use crate::db::{Database, EmailTokenKind, User, generate_secret, hash_secret, now_secs};
use crate::error::AuthError;

/// Verification tokens are valid for 24 hours.
pub const VERIFICATION_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Reset tokens are valid for 10 minutes.
pub const RESET_TOKEN_TTL_SECS: i64 = 10 * 60;

const EMAIL_TOKEN_BYTES: usize = 32;

/// What consuming a token does to the user record.
#[derive(Debug, Clone, Copy)]
pub enum ConsumeEffect<'a> {
    /// Mark the email verified (verification token)
    MarkVerified,
    /// Replace the password hash (reset token)
    SetPassword(&'a str),
}

#[derive(Clone)]
pub struct EmailTokenManager {
    db: Database,
}

impl EmailTokenManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn ttl_secs(kind: EmailTokenKind) -> i64 {
        match kind {
            EmailTokenKind::Verification => VERIFICATION_TOKEN_TTL_SECS,
            EmailTokenKind::Reset => RESET_TOKEN_TTL_SECS,
        }
    }

    /// Issue a token of the given kind, replacing any earlier one.
    /// Returns the raw value for delivery.
    pub async fn issue(&self, kind: EmailTokenKind, user_id: i64) -> Result<String, AuthError> {
        let raw = generate_secret(EMAIL_TOKEN_BYTES);
        let expires_at = now_secs() + Self::ttl_secs(kind);

        let updated = self
            .db
            .users()
            .set_email_token(user_id, kind, &hash_secret(&raw), expires_at)
            .await?;
        if !updated {
            return Err(AuthError::NotFound("User not found".into()));
        }
        Ok(raw)
    }

    /// Consume a presented token and apply its effect atomically.
    ///
    /// A wrong, reused or expired token all fail the same way.
    pub async fn consume(&self, raw: &str, effect: ConsumeEffect<'_>) -> Result<User, AuthError> {
        let hash = hash_secret(raw);
        let now = now_secs();
        let users = self.db.users();

        let user = match effect {
            ConsumeEffect::MarkVerified => users.consume_verification_token(&hash, now).await?,
            ConsumeEffect::SetPassword(password_hash) => {
                users.consume_reset_token(&hash, now, password_hash).await?
            }
        };
        user.ok_or(AuthError::TokenInvalidOrExpired)
    }

    /// Withdraw an issued token if it is still the current one.
    pub async fn revoke(
        &self,
        kind: EmailTokenKind,
        user_id: i64,
        raw: &str,
    ) -> Result<(), AuthError> {
        self.db
            .users()
            .clear_email_token(user_id, kind, &hash_secret(raw))
            .await?;
        Ok(())
    }
}
