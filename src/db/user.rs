use sqlx::sqlite::SqlitePool;

use super::now_secs;

/// Avatar assigned to accounts that don't bring their own.
pub const DEFAULT_AVATAR: &str = "https://www.gravatar.com/avatar/?d=mp";

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub email: String,
    /// Absent for accounts created through an external identity provider.
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub avatar: String,
    pub email_verified: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    name: String,
    email: String,
    password_hash: Option<String>,
    google_id: Option<String>,
    avatar: String,
    email_verified: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            google_id: row.google_id,
            avatar: row.avatar,
            email_verified: row.email_verified != 0,
        }
    }
}

macro_rules! user_columns {
    () => {
        "id, uuid, name, email, password_hash, google_id, avatar, email_verified"
    };
}

/// Fields for inserting a new user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub google_id: Option<&'a str>,
    pub avatar: Option<&'a str>,
    pub email_verified: bool,
}

/// The two kinds of one-time email tokens embedded on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTokenKind {
    Verification,
    Reset,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, name, email, password_hash, google_id, avatar, email_verified, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.google_id)
        .bind(user.avatar.unwrap_or(DEFAULT_AVATAR))
        .bind(user.email_verified as i32)
        .bind(now_secs())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(concat!("SELECT ", user_columns!(), " FROM users WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(concat!("SELECT ", user_columns!(), " FROM users WHERE uuid = ?"))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(concat!("SELECT ", user_columns!(), " FROM users WHERE email = ?"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by Google account ID.
    pub async fn get_by_google_id(&self, google_id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE google_id = ?"
        ))
        .bind(google_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Check whether an email is already registered.
    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Attach a Google account ID to an existing user, optionally marking the
    /// email verified. Only links accounts that are not linked yet.
    pub async fn link_google_id(
        &self,
        id: i64,
        google_id: &str,
        email_verified: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET google_id = ?, email_verified = MAX(email_verified, ?)
             WHERE id = ? AND google_id IS NULL",
        )
        .bind(google_id)
        .bind(email_verified as i32)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the password hash.
    pub async fn set_password(&self, id: i64, password_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the digest and expiry of a freshly issued email token,
    /// replacing any previous token of the same kind.
    pub async fn set_email_token(
        &self,
        id: i64,
        kind: EmailTokenKind,
        token_hash: &str,
        expires_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let sql = match kind {
            EmailTokenKind::Verification => {
                "UPDATE users SET verification_token_hash = ?, verification_expires_at = ? WHERE id = ?"
            }
            EmailTokenKind::Reset => {
                "UPDATE users SET reset_token_hash = ?, reset_expires_at = ? WHERE id = ?"
            }
        };
        let result = sqlx::query(sql)
            .bind(token_hash)
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear an email token, but only if it is still the one identified by `token_hash`.
    pub async fn clear_email_token(
        &self,
        id: i64,
        kind: EmailTokenKind,
        token_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let sql = match kind {
            EmailTokenKind::Verification => {
                "UPDATE users SET verification_token_hash = NULL, verification_expires_at = NULL
                 WHERE id = ? AND verification_token_hash = ?"
            }
            EmailTokenKind::Reset => {
                "UPDATE users SET reset_token_hash = NULL, reset_expires_at = NULL
                 WHERE id = ? AND reset_token_hash = ?"
            }
        };
        let result = sqlx::query(sql)
            .bind(id)
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Consume a verification token and mark the email verified, in one statement.
    /// Returns `None` if no unexpired token matches.
    pub async fn consume_verification_token(
        &self,
        token_hash: &str,
        now: i64,
    ) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(concat!(
            "UPDATE users SET verification_token_hash = NULL, verification_expires_at = NULL, email_verified = 1
             WHERE verification_token_hash = ? AND verification_expires_at > ?
             RETURNING ",
            user_columns!()
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Consume a reset token and set the new password hash, in one statement.
    /// Returns `None` if no unexpired token matches.
    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: i64,
        password_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(concat!(
            "UPDATE users SET reset_token_hash = NULL, reset_expires_at = NULL, password_hash = ?
             WHERE reset_token_hash = ? AND reset_expires_at > ?
             RETURNING ",
            user_columns!()
        ))
        .bind(password_hash)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Clear email tokens whose expiry has passed.
    pub async fn clear_expired_email_tokens(&self) -> Result<u64, sqlx::Error> {
        let now = now_secs();
        let verification = sqlx::query(
            "UPDATE users SET verification_token_hash = NULL, verification_expires_at = NULL
             WHERE verification_expires_at IS NOT NULL AND verification_expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        let reset = sqlx::query(
            "UPDATE users SET reset_token_hash = NULL, reset_expires_at = NULL
             WHERE reset_expires_at IS NOT NULL AND reset_expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(verification.rows_affected() + reset.rows_affected())
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
