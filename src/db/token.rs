//! Refresh token storage, rotation and revocation.
//!
//! Only SHA-256 digests of refresh tokens are stored. Records that share a
//! `family` form one rotation chain; each rotated record points at its
//! successor through `replaced_by`. Access tokens are never stored.

use std::str::FromStr;

use sqlx::sqlite::SqlitePool;

/// Why a refresh token stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeReason {
    /// Exchanged for a successor
    Rotated,
    /// Explicit logout
    Logout,
    /// An already rotated token from this chain was presented again
    ReuseDetected,
    /// Password reset or change
    SecurityEvent,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Rotated => "rotated",
            RevokeReason::Logout => "logout",
            RevokeReason::ReuseDetected => "reuse_detected",
            RevokeReason::SecurityEvent => "security_event",
        }
    }
}

impl FromStr for RevokeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotated" => Ok(RevokeReason::Rotated),
            "logout" => Ok(RevokeReason::Logout),
            "reuse_detected" => Ok(RevokeReason::ReuseDetected),
            "security_event" => Ok(RevokeReason::SecurityEvent),
            other => Err(format!("unknown revoke reason: {}", other)),
        }
    }
}

/// A stored refresh token record.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token_hash: String,
    pub user_id: i64,
    pub family: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub revoked_reason: Option<RevokeReason>,
    pub replaced_by: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    token_hash: String,
    user_id: i64,
    family: String,
    created_at: i64,
    expires_at: i64,
    revoked: i32,
    revoked_reason: Option<String>,
    replaced_by: Option<String>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            token_hash: row.token_hash,
            user_id: row.user_id,
            family: row.family,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked: row.revoked != 0,
            revoked_reason: row.revoked_reason.as_deref().and_then(|r| r.parse().ok()),
            replaced_by: row.replaced_by,
        }
    }
}

/// Result of an attempted rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented record was revoked and its successor inserted.
    Rotated,
    /// The record was no longer active when the write happened, typically
    /// because a concurrent request rotated it first. Nothing was written.
    Conflict,
}

/// Store for refresh token records.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the first record of a new rotation chain.
    pub async fn create(
        &self,
        token_hash: &str,
        user_id: i64,
        family: &str,
        created_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, family, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(family)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a record by token digest.
    pub async fn get_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            "SELECT id, token_hash, user_id, family, created_at, expires_at, revoked, revoked_reason, replaced_by
             FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Revoke the record identified by `old_hash` and insert its successor in
    /// the same chain, in one transaction.
    ///
    /// The revoke is conditional on the record still being active at `now`,
    /// so of two concurrent rotations of the same token exactly one succeeds.
    pub async fn rotate(
        &self,
        old_hash: &str,
        new_hash: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<RotateOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ?, replaced_by = ?
             WHERE token_hash = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(RevokeReason::Rotated.as_str())
        .bind(new_hash)
        .bind(old_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(RotateOutcome::Conflict);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, family, created_at, expires_at)
             SELECT ?, user_id, family, ?, ? FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(new_hash)
        .bind(now)
        .bind(expires_at)
        .bind(old_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RotateOutcome::Rotated)
    }

    /// Revoke every unrevoked record of a rotation chain.
    pub async fn revoke_family(
        &self,
        family: &str,
        reason: RevokeReason,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ? WHERE family = ? AND revoked = 0",
        )
        .bind(reason.as_str())
        .bind(family)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every unrevoked record belonging to a user (all sessions).
    pub async fn revoke_all_for_user(
        &self,
        user_id: i64,
        reason: RevokeReason,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(reason.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List the records of a rotation chain, oldest first.
    pub async fn list_family(&self, family: &str) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(
            "SELECT id, token_hash, user_id, family, created_at, expires_at, revoked, revoked_reason, replaced_by
             FROM refresh_tokens WHERE family = ? ORDER BY id",
        )
        .bind(family)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Count a user's active records (one per live session).
    pub async fn count_active_for_user(&self, user_id: i64, now: i64) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Delete all expired records.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewUser, now_secs};

    use super::*;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db
            .users()
            .create(&NewUser {
                uuid: "uuid-1",
                name: "Alice",
                email: "alice@example.com",
                password_hash: None,
                google_id: None,
                avatar: None,
                email_verified: false,
            })
            .await
            .unwrap();
        (db, user_id)
    }

    #[tokio::test]
    async fn test_rotate_links_successor() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("h1", user_id, "fam", now, now + 100).await.unwrap();

        let outcome = store.rotate("h1", "h2", now, now + 100).await.unwrap();
        assert_eq!(outcome, RotateOutcome::Rotated);

        let old = store.get_by_hash("h1").await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.revoked_reason, Some(RevokeReason::Rotated));
        assert_eq!(old.replaced_by.as_deref(), Some("h2"));

        let new = store.get_by_hash("h2").await.unwrap().unwrap();
        assert!(new.is_active(now));
        assert_eq!(new.family, "fam");
        assert_eq!(new.user_id, user_id);
    }

    #[tokio::test]
    async fn test_rotate_twice_conflicts() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("h1", user_id, "fam", now, now + 100).await.unwrap();
        store.rotate("h1", "h2", now, now + 100).await.unwrap();

        let outcome = store.rotate("h1", "h3", now, now + 100).await.unwrap();
        assert_eq!(outcome, RotateOutcome::Conflict);
        assert!(store.get_by_hash("h3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_expired_conflicts() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("h1", user_id, "fam", now - 100, now - 1).await.unwrap();

        let outcome = store.rotate("h1", "h2", now, now + 100).await.unwrap();
        assert_eq!(outcome, RotateOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_revoke_family_only_touches_chain() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("a1", user_id, "fam-a", now, now + 100).await.unwrap();
        store.create("b1", user_id, "fam-b", now, now + 100).await.unwrap();

        let count = store.revoke_family("fam-a", RevokeReason::Logout).await.unwrap();
        assert_eq!(count, 1);

        let a = store.get_by_hash("a1").await.unwrap().unwrap();
        assert_eq!(a.revoked_reason, Some(RevokeReason::Logout));
        assert!(store.get_by_hash("b1").await.unwrap().unwrap().is_active(now));
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("a1", user_id, "fam-a", now, now + 100).await.unwrap();
        store.create("b1", user_id, "fam-b", now, now + 100).await.unwrap();
        assert_eq!(store.count_active_for_user(user_id, now).await.unwrap(), 2);

        store
            .revoke_all_for_user(user_id, RevokeReason::SecurityEvent)
            .await
            .unwrap();
        assert_eq!(store.count_active_for_user(user_id, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (db, user_id) = setup().await;
        let now = now_secs();
        let store = db.refresh_tokens();

        store.create("old", user_id, "fam-a", now - 200, now - 100).await.unwrap();
        store.create("new", user_id, "fam-b", now, now + 100).await.unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(store.get_by_hash("old").await.unwrap().is_none());
        assert!(store.get_by_hash("new").await.unwrap().is_some());
    }

    #[test]
    fn test_revoke_reason_round_trip() {
        for reason in [
            RevokeReason::Rotated,
            RevokeReason::Logout,
            RevokeReason::ReuseDetected,
            RevokeReason::SecurityEvent,
        ] {
            assert_eq!(reason.as_str().parse::<RevokeReason>(), Ok(reason));
        }
        assert!("bogus".parse::<RevokeReason>().is_err());
    }
}
