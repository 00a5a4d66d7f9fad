//! One-time codes that hand a completed OAuth sign-in over to the browser.

use sqlx::sqlite::SqlitePool;

pub struct ExchangeCodeStore {
    pool: SqlitePool,
}

impl ExchangeCodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store the digest of a freshly minted exchange code.
    pub async fn create(
        &self,
        code_hash: &str,
        user_id: i64,
        expires_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO oauth_exchange_codes (code_hash, user_id, expires_at) VALUES (?, ?, ?)",
        )
        .bind(code_hash)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Redeem a code: delete it and return its user ID, if it existed and had
    /// not expired. A code can only ever be redeemed once.
    pub async fn redeem(&self, code_hash: &str, now: i64) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "DELETE FROM oauth_exchange_codes WHERE code_hash = ? RETURNING user_id, expires_at",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(user_id, expires_at)| (expires_at > now).then_some(user_id)))
    }

    /// Delete all expired codes.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_exchange_codes WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewUser, now_secs};

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db
            .users()
            .create(&NewUser {
                uuid: "uuid-1",
                name: "Alice",
                email: "alice@example.com",
                password_hash: None,
                google_id: Some("g-1"),
                avatar: None,
                email_verified: true,
            })
            .await
            .unwrap();
        (db, user_id)
    }

    #[tokio::test]
    async fn test_redeem_once() {
        let (db, user_id) = setup().await;
        let now = now_secs();

        db.exchange_codes().create("c1", user_id, now + 60).await.unwrap();

        assert_eq!(db.exchange_codes().redeem("c1", now).await.unwrap(), Some(user_id));
        assert_eq!(db.exchange_codes().redeem("c1", now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_code_is_not_redeemable() {
        let (db, user_id) = setup().await;
        let now = now_secs();

        db.exchange_codes().create("c1", user_id, now - 1).await.unwrap();
        assert_eq!(db.exchange_codes().redeem("c1", now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (db, user_id) = setup().await;
        let now = now_secs();

        db.exchange_codes().create("old", user_id, now - 1).await.unwrap();
        db.exchange_codes().create("new", user_id, now + 60).await.unwrap();

        assert_eq!(db.exchange_codes().delete_expired(now).await.unwrap(), 1);
        assert_eq!(db.exchange_codes().redeem("new", now).await.unwrap(), Some(user_id));
    }
}
