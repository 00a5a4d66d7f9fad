//! Scheduled cleanup of expired credentials.

use crate::db::{Database, now_secs};
use crate::rate_limit::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    let now = now_secs();

    // Expired refresh tokens, including revoked chain history
    match db.refresh_tokens().delete_expired(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh tokens: {}", e),
    }

    match db.exchange_codes().delete_expired(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired exchange codes", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up exchange codes: {}", e),
    }

    // Lapsed verification and reset tokens on user records
    match db.users().clear_expired_email_tokens().await {
        Ok(count) if count > 0 => info!("Cleared {} expired email tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clear expired email tokens: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically, also pruning
/// idle rate limiter entries when limits are enabled.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    rate_limit: Option<Arc<RateLimitConfig>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
            if let Some(limits) = &rate_limit {
                limits.prune();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EmailTokenKind, NewUser};

    #[tokio::test]
    async fn test_cleanup_removes_expired_state() {
        let db = Database::open(":memory:").await.unwrap();
        let now = now_secs();
        let id = db
            .users()
            .create(&NewUser {
                uuid: "uuid-1",
                name: "Ann",
                email: "a@x.com",
                password_hash: None,
                google_id: None,
                avatar: None,
                email_verified: false,
            })
            .await
            .unwrap();

        db.refresh_tokens()
            .create("old", id, "fam-a", now - 200, now - 100)
            .await
            .unwrap();
        db.refresh_tokens()
            .create("live", id, "fam-b", now, now + 100)
            .await
            .unwrap();
        db.exchange_codes().create("code", id, now - 1).await.unwrap();
        db.users()
            .set_email_token(id, EmailTokenKind::Reset, "hash", now - 1)
            .await
            .unwrap();

        run_cleanup(&db).await;

        assert!(db.refresh_tokens().get_by_hash("old").await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_hash("live").await.unwrap().is_some());
        let (codes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM oauth_exchange_codes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(codes, 0);
        let (reset,): (Option<String>,) =
            sqlx::query_as("SELECT reset_token_hash FROM users WHERE id = ?")
                .bind(id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert!(reset.is_none());
    }
}
