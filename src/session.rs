//! Session issuance and the refresh token rotation protocol.
//!
//! A session is an access token (stateless JWT) plus an opaque refresh token
//! whose SHA-256 digest is persisted. Every login starts a new rotation chain
//! (family); every refresh revokes the presented record and appends its
//! successor to the same chain.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{
    Database, RefreshTokenRecord, RevokeReason, RotateOutcome, User, generate_secret, hash_secret,
    now_secs,
};
use crate::error::AuthError;
use crate::jwt::TokenCodec;

/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Bytes of entropy in a refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// A rotated token presented again this soon after its rotation, while the
/// successor is still unused, counts as a lost race rather than theft.
pub const ROTATION_GRACE_SECS: i64 = 10;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    /// Access token lifetime in seconds
    pub access_expires_in: u64,
    pub refresh_token: String,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: u64,
}

/// Mints sessions and runs rotation and revocation against the database.
#[derive(Clone)]
pub struct SessionIssuer {
    db: Database,
    codec: Arc<TokenCodec>,
    refresh_ttl_secs: u64,
}

impl SessionIssuer {
    pub fn new(db: Database, codec: Arc<TokenCodec>, refresh_ttl_secs: u64) -> Self {
        Self {
            db,
            codec,
            refresh_ttl_secs,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Start a new session (and a new rotation chain) for a user.
    pub async fn issue(&self, user: &User) -> Result<TokenPair, AuthError> {
        let refresh_token = generate_secret(REFRESH_TOKEN_BYTES);
        let family = uuid::Uuid::new_v4().to_string();
        let now = now_secs();

        self.db
            .refresh_tokens()
            .create(
                &hash_secret(&refresh_token),
                user.id,
                &family,
                now,
                now + self.refresh_ttl_secs as i64,
            )
            .await?;

        debug!(user = %user.uuid, family = %family, "Session issued");
        self.pair(user, refresh_token)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token is revoked with its successor recorded; presenting
    /// it again fails. Replaying a token that was already rotated is treated
    /// as theft and revokes the whole chain, unless the replay lost a race
    /// (see [`ROTATION_GRACE_SECS`]).
    pub async fn rotate(&self, presented: &str) -> Result<(TokenPair, User), AuthError> {
        let store = self.db.refresh_tokens();
        let old_hash = hash_secret(presented);
        let now = now_secs();

        let record = store
            .get_by_hash(&old_hash)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if record.revoked {
            return Err(match record.revoked_reason {
                Some(RevokeReason::Rotated) if self.lost_rotation_race(&record, now).await? => {
                    debug!(family = %record.family, "Rotated refresh token presented within grace window");
                    AuthError::TokenInvalid
                }
                Some(RevokeReason::Rotated) => {
                    let revoked = store
                        .revoke_family(&record.family, RevokeReason::ReuseDetected)
                        .await?;
                    warn!(
                        user_id = record.user_id,
                        family = %record.family,
                        revoked,
                        "Rotated refresh token presented again, chain revoked"
                    );
                    AuthError::TokenInvalid
                }
                Some(RevokeReason::ReuseDetected) | Some(RevokeReason::SecurityEvent) => {
                    AuthError::TokenRevoked
                }
                Some(RevokeReason::Logout) | None => AuthError::TokenInvalid,
            });
        }

        if record.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .db
            .users()
            .get_by_id(record.user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let refresh_token = generate_secret(REFRESH_TOKEN_BYTES);
        let outcome = store
            .rotate(
                &old_hash,
                &hash_secret(&refresh_token),
                now,
                now + self.refresh_ttl_secs as i64,
            )
            .await?;

        if outcome == RotateOutcome::Conflict {
            // A concurrent request rotated the same token first.
            debug!(family = %record.family, "Lost refresh rotation race");
            return Err(AuthError::TokenInvalid);
        }

        let pair = self.pair(&user, refresh_token)?;
        Ok((pair, user))
    }

    /// Whether a replayed, rotated record lost a concurrent refresh: its
    /// successor is unused and was minted within the grace window.
    async fn lost_rotation_race(
        &self,
        record: &RefreshTokenRecord,
        now: i64,
    ) -> Result<bool, AuthError> {
        let Some(successor_hash) = record.replaced_by.as_deref() else {
            return Ok(false);
        };
        let successor = self.db.refresh_tokens().get_by_hash(successor_hash).await?;
        Ok(successor.is_some_and(|s| {
            s.is_active(now) && now - s.created_at <= ROTATION_GRACE_SECS
        }))
    }

    /// End the session a refresh token belongs to. Unknown tokens, and
    /// tokens of another user, are ignored.
    pub async fn logout(&self, user_id: i64, presented: &str) -> Result<(), AuthError> {
        let store = self.db.refresh_tokens();
        let Some(record) = store.get_by_hash(&hash_secret(presented)).await? else {
            return Ok(());
        };

        if record.user_id != user_id {
            warn!(
                user_id,
                owner = record.user_id,
                "Logout presented a refresh token of another user, ignored"
            );
            return Ok(());
        }

        store
            .revoke_family(&record.family, RevokeReason::Logout)
            .await?;
        Ok(())
    }

    /// Revoke every session of a user after a credential change.
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, AuthError> {
        let revoked = self
            .db
            .refresh_tokens()
            .revoke_all_for_user(user_id, RevokeReason::SecurityEvent)
            .await?;
        Ok(revoked)
    }

    fn pair(&self, user: &User, refresh_token: String) -> Result<TokenPair, AuthError> {
        let access = self
            .codec
            .issue(&user.uuid)
            .map_err(|e| AuthError::internal("Failed to sign access token", e))?;

        Ok(TokenPair {
            access_token: access.token,
            access_expires_in: access.duration,
            refresh_token,
            refresh_expires_in: self.refresh_ttl_secs,
        })
    }
}
