//! PostgreSQL-backed auth store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    ActivityStore, OAuthAccountStore, SessionStore, UserStore, activity_id, normalize_email,
};
use crate::auth::AuthError;
use crate::models::auth::{
    ActivityEntry, ActivityKind, ClientMeta, NewUser, OAuthAccount, Session, User,
};

const USER_COLUMNS: &str = "id::text AS id, email, username, first_name, last_name, \
     password_hash, is_admin, email_verified, is_active, avatar_url, created_at, updated_at";

const SESSION_COLUMNS: &str = "id::text AS id, user_id::text AS user_id, expires_at, \
     created_at, last_used_at, ip_address, user_agent";

const OAUTH_COLUMNS: &str = "id::text AS id, user_id::text AS user_id, provider_id, \
     provider_account_id, created_at";

/// Embedded migrations from `rollauth_core/migrations/`.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Auth store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or upgrade the auth tables.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

/// Map unique-constraint violations to `Conflict` naming the field.
fn map_unique_violation(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        let field = match db.constraint() {
            Some("users_email_key") => "email",
            Some("users_username_key") => "username",
            Some("oauth_accounts_provider_account_key") => "provider_account",
            _ => "record",
        };
        return AuthError::Conflict { field };
    }
    AuthError::DbError(e)
}

/// Insert a user inside `tx`, granting admin when the table is empty.
///
/// The table lock serializes concurrent inserts so two simultaneous "first"
/// registrations cannot both observe an empty table.
async fn insert_user_tx(
    tx: &mut Transaction<'_, Postgres>,
    user: NewUser,
) -> Result<User, AuthError> {
    sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut **tx)
        .await?;

    let sql = format!(
        "INSERT INTO users \
         (email, username, first_name, last_name, password_hash, is_admin, email_verified, avatar_url) \
         VALUES ($1, $2, $3, $4, $5, $6 OR NOT EXISTS (SELECT 1 FROM users), $7, $8) \
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&sql)
        .bind(normalize_email(&user.email))
        .bind(user.username)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.password_hash)
        .bind(user.is_admin)
        .bind(user.email_verified)
        .bind(user.avatar_url)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_unique_violation)
}

#[async_trait]
impl UserStore for PgAuthStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1::uuid");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_user_by_login(
        &self,
        email_or_username: &str,
    ) -> Result<Option<User>, AuthError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $2 \
             ORDER BY (email = $1) DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email_or_username))
            .bind(email_or_username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;
        let user = insert_user_tx(&mut tx, user).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn update_password_hash(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1::uuid",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool, AuthError> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1::uuid")
                .bind(user_id)
                .bind(active)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
        let rows = sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn user_count(&self) -> Result<i64, AuthError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl SessionStore for PgAuthStore {
    async fn create_session(
        &self,
        user_id: &str,
        meta: &ClientMeta,
        ttl: Duration,
    ) -> Result<Session, AuthError> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO sessions \
             (id, user_id, expires_at, created_at, last_used_at, ip_address, user_agent) \
             VALUES ($1, $2::uuid, $3, $4, $4, $5, $6) \
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(now + ttl)
            .bind(now)
            .bind(meta.ip_address.as_deref())
            .bind(meta.user_agent.as_deref())
            .fetch_one(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1::uuid");
        let row = sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_session(&self, session_id: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE sessions SET last_used_at = now() WHERE id = $1::uuid")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_session(&self, session_id: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1::uuid")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1::uuid ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn revoke_user_sessions(&self, user_id: &str) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1::uuid")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_sessions(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OAuthAccountStore for PgAuthStore {
    async fn find_oauth_account(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>, AuthError> {
        let sql = format!(
            "SELECT {OAUTH_COLUMNS} FROM oauth_accounts \
             WHERE provider_id = $1 AND provider_account_id = $2"
        );
        let row = sqlx::query_as::<_, OAuthAccount>(&sql)
            .bind(provider_id)
            .bind(provider_account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<OAuthAccount, AuthError> {
        let sql = format!(
            "INSERT INTO oauth_accounts (user_id, provider_id, provider_account_id) \
             VALUES ($1::uuid, $2, $3) RETURNING {OAUTH_COLUMNS}"
        );
        sqlx::query_as::<_, OAuthAccount>(&sql)
            .bind(user_id)
            .bind(provider_id)
            .bind(provider_account_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)
    }

    async fn insert_oauth_user(
        &self,
        user: NewUser,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<(User, OAuthAccount), AuthError> {
        let mut tx = self.pool.begin().await?;
        let user = insert_user_tx(&mut tx, user).await?;

        let sql = format!(
            "INSERT INTO oauth_accounts (user_id, provider_id, provider_account_id) \
             VALUES ($1::uuid, $2, $3) RETURNING {OAUTH_COLUMNS}"
        );
        let account = sqlx::query_as::<_, OAuthAccount>(&sql)
            .bind(&user.id)
            .bind(provider_id)
            .bind(provider_account_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

        tx.commit().await?;
        Ok((user, account))
    }

    async fn list_oauth_accounts(&self, user_id: &str) -> Result<Vec<OAuthAccount>, AuthError> {
        let sql = format!(
            "SELECT {OAUTH_COLUMNS} FROM oauth_accounts \
             WHERE user_id = $1::uuid ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, OAuthAccount>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<bool, AuthError> {
        let result =
            sqlx::query("DELETE FROM oauth_accounts WHERE user_id = $1::uuid AND provider_id = $2")
                .bind(user_id)
                .bind(provider_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ActivityStore for PgAuthStore {
    async fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO user_activity (id, user_id, kind, detail) VALUES ($1, $2::uuid, $3, $4)",
        )
        .bind(activity_id())
        .bind(user_id)
        .bind(kind.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_activity(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, AuthError> {
        let rows = sqlx::query_as::<_, ActivityEntry>(
            "SELECT id::text AS id, user_id::text AS user_id, kind, detail, created_at \
             FROM user_activity \
             WHERE user_id = $1::uuid \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
