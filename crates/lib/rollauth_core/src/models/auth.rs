//! Authentication domain models.
//!
//! These are internal domain models, distinct from the HTTP request/response
//! shapes in `rollauth_api` (which rename fields to camelCase etc.).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    /// Stored lower-cased; unique.
    pub email: String,
    /// Unique when present.
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    /// `None` for OAuth-only accounts.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub email_verified: bool,
    /// Deactivated accounts keep their rows but cannot sign in.
    pub is_active: bool,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account can sign in with a password.
    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Insert payload for a user row.
///
/// `is_admin` is a request; stores additionally grant admin to the first
/// user ever inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub email_verified: bool,
    pub avatar_url: Option<String>,
}

/// Client metadata captured when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Server-side record of one authenticated client.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    /// A session is valid only while `now < expires_at`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Identity fields embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPayload {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub session_id: String,
}

impl SessionPayload {
    /// Payload for `user` bound to `session`.
    pub fn for_session(user: &User, session: &Session) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_admin: user.is_admin,
            session_id: session.id.clone(),
        }
    }
}

/// JWT claims embedded in session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    /// Session ID.
    pub sid: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    /// Strip the registered claims, returning the identity payload.
    pub fn payload(&self) -> SessionPayload {
        SessionPayload {
            user_id: self.sub.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            is_admin: self.is_admin,
            session_id: self.sid.clone(),
        }
    }
}

/// Link between a local user and an external identity-provider account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthAccount {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub provider_account_id: String,
    pub created_at: DateTime<Utc>,
}

/// Kinds of recorded user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Register,
    Login,
    LoginFailure,
    Logout,
    OAuthLogin,
    OAuthLink,
    OAuthRegister,
    OAuthUnlink,
    PasswordChange,
    Deactivated,
    Reactivated,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Register => "register",
            ActivityKind::Login => "login",
            ActivityKind::LoginFailure => "login_failure",
            ActivityKind::Logout => "logout",
            ActivityKind::OAuthLogin => "oauth_login",
            ActivityKind::OAuthLink => "oauth_link",
            ActivityKind::OAuthRegister => "oauth_register",
            ActivityKind::OAuthUnlink => "oauth_unlink",
            ActivityKind::PasswordChange => "password_change",
            ActivityKind::Deactivated => "deactivated",
            ActivityKind::Reactivated => "reactivated",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(ActivityKind::Register),
            "login" => Ok(ActivityKind::Login),
            "login_failure" => Ok(ActivityKind::LoginFailure),
            "logout" => Ok(ActivityKind::Logout),
            "oauth_login" => Ok(ActivityKind::OAuthLogin),
            "oauth_link" => Ok(ActivityKind::OAuthLink),
            "oauth_register" => Ok(ActivityKind::OAuthRegister),
            "oauth_unlink" => Ok(ActivityKind::OAuthUnlink),
            "password_change" => Ok(ActivityKind::PasswordChange),
            "deactivated" => Ok(ActivityKind::Deactivated),
            "reactivated" => Ok(ActivityKind::Reactivated),
            other => Err(format!("unknown activity kind '{other}'")),
        }
    }
}

/// Activity log record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}
