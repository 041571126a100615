//! Authentication and authorization logic.
//!
//! Provides password hashing, session token issuance, session bookkeeping,
//! and the password registration/login flows shared by the HTTP layer and
//! the OAuth orchestrator.

pub mod cookies;
pub mod identity;
pub mod jwt;
pub mod password;
pub mod service;
pub mod session;

use thiserror::Error;

/// Authentication errors.
///
/// User-facing variants carry messages that are safe to render directly.
/// `DbError` and `Internal` are logged server-side and surfaced generically.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{} already in use", capitalize(.field))]
    Conflict { field: &'static str },

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("OAuth exchange failed: {0}")]
    OAuthExchange(String),

    #[error("OAuth provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Too many attempts, try again in {retry_after_secs} seconds")]
    RateLimitExceeded { retry_after_secs: i64 },

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Account is deactivated")]
    AccountDisabled,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Email address is not verified by the provider")]
    UnverifiedEmail,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// `provider_account` -> `Provider account`.
fn capitalize(field: &str) -> String {
    let words = field.replace('_', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl AuthError {
    /// Whether the caller may simply try the same operation again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::ProviderUnavailable(_) | AuthError::RateLimitExceeded { .. }
        )
    }
}
