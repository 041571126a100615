//! Persistence for users, sessions, OAuth links and activity.
//!
//! The flows depend only on these traits. `PgAuthStore` backs them with
//! PostgreSQL; `MemoryAuthStore` keeps everything in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::models::auth::{
    ActivityEntry, ActivityKind, ClientMeta, NewUser, OAuthAccount, Session, User,
};

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

/// Credential store.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError>;

    /// Lookup by email (case-insensitive).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    /// Lookup by either email or username.
    ///
    /// An email match wins over a username match, so an account can never be
    /// shadowed by another user's username.
    async fn find_user_by_login(&self, email_or_username: &str)
    -> Result<Option<User>, AuthError>;

    /// Insert a user.
    ///
    /// The row is admin when `user.is_admin` is set or when no user exists at
    /// the moment of the insert; the emptiness check and the insert are one
    /// atomic step. Duplicate email/username yield `AuthError::Conflict`.
    async fn insert_user(&self, user: NewUser) -> Result<User, AuthError>;

    /// Replace the password hash and bump `updated_at`. Returns whether the
    /// user exists.
    async fn update_password_hash(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError>;

    /// Set `is_active` and bump `updated_at`. Returns whether the user exists.
    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool, AuthError>;

    async fn list_users(&self) -> Result<Vec<User>, AuthError>;

    async fn user_count(&self) -> Result<i64, AuthError>;
}

/// Session store: an auditing/revocation side-channel next to token signatures.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session expiring `ttl` from now.
    async fn create_session(
        &self,
        user_id: &str,
        meta: &ClientMeta,
        ttl: Duration,
    ) -> Result<Session, AuthError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError>;

    /// Update `last_used_at`.
    async fn touch_session(&self, session_id: &str) -> Result<(), AuthError>;

    /// Delete a session. Returns whether a row was removed.
    async fn revoke_session(&self, session_id: &str) -> Result<bool, AuthError>;

    /// Sessions of a user, newest first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError>;

    /// Delete every session of a user, returning how many were removed.
    async fn revoke_user_sessions(&self, user_id: &str) -> Result<u64, AuthError>;

    /// Delete expired sessions, returning how many were removed.
    async fn purge_expired_sessions(&self) -> Result<u64, AuthError>;
}

/// OAuth account links.
#[async_trait]
pub trait OAuthAccountStore: Send + Sync {
    async fn find_oauth_account(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>, AuthError>;

    /// Link an external account to an existing user.
    ///
    /// A duplicate `(provider, account)` pair yields `Conflict { field: "provider_account" }`.
    async fn insert_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<OAuthAccount, AuthError>;

    /// Create a user and its first link atomically: either both rows exist
    /// afterwards or neither does.
    async fn insert_oauth_user(
        &self,
        user: NewUser,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<(User, OAuthAccount), AuthError>;

    async fn list_oauth_accounts(&self, user_id: &str) -> Result<Vec<OAuthAccount>, AuthError>;

    /// Remove the user's link for a provider. Returns whether a row was removed.
    async fn delete_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<bool, AuthError>;
}

/// User activity log.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> Result<(), AuthError>;

    /// Most recent entries first.
    async fn list_activity(&self, user_id: &str, limit: i64)
    -> Result<Vec<ActivityEntry>, AuthError>;
}

/// Everything the auth flows persist.
pub trait AuthStore: UserStore + SessionStore + OAuthAccountStore + ActivityStore {}

impl<T> AuthStore for T where T: UserStore + SessionStore + OAuthAccountStore + ActivityStore {}

/// Id of a new activity record.
///
/// Activity ids are v7 so they sort by creation time. Users, sessions and
/// links use random v4 ids, since a session id must not reveal when it was
/// minted.
pub(crate) fn activity_id() -> Uuid {
    Uuid::now_v7()
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
