//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use rollauth_core::auth::AuthError;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Message shown for every unexpected failure.
const GENERIC_MESSAGE: &str = "Something went wrong";

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unverified email")]
    UnverifiedEmail,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Rate limited")]
    RateLimited { retry_after_secs: i64 },

    #[error("Provider exchange failed: {0}")]
    BadGateway(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    /// Machine-readable code, used as the `error` body field and in OAuth
    /// failure redirects.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::InvalidState => "invalid_state",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::UnverifiedEmail => "unverified_email",
            AppError::AccountDisabled => "account_disabled",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::BadGateway(_) => "oauth_failed",
            AppError::ProviderUnavailable(_) => "provider_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidState => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::AccountDisabled => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::UnverifiedEmail => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(m)
            | AppError::Unauthorized(m)
            | AppError::Forbidden(m)
            | AppError::NotFound(m)
            | AppError::Conflict(m) => m.clone(),
            AppError::InvalidState => "Sign-in request expired or was tampered with".into(),
            AppError::UnverifiedEmail => {
                "An account with this email exists; sign in to link this provider".into()
            }
            AppError::AccountDisabled => "This account has been deactivated".into(),
            AppError::RateLimited { retry_after_secs } => {
                format!("Too many attempts, retry in {retry_after_secs} seconds")
            }
            AppError::BadGateway(_) => "Sign-in with the provider failed".into(),
            AppError::ProviderUnavailable(_) => "The sign-in provider is unavailable".into(),
            AppError::Internal(_) => GENERIC_MESSAGE.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(detail) => error!(error = %detail, "Internal error"),
            AppError::BadGateway(detail) | AppError::ProviderUnavailable(detail) => {
                warn!(error = %detail, "OAuth provider failure")
            }
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message: self.message(),
        });
        let mut response = (self.status(), body).into_response();
        if let AppError::RateLimited { retry_after_secs } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::Unauthenticated => AppError::Unauthorized("Not authenticated".into()),
            AuthError::Forbidden => AppError::Forbidden("Admin access required".into()),
            AuthError::Conflict { .. } => AppError::Conflict(e.to_string()),
            AuthError::InvalidState => AppError::InvalidState,
            AuthError::UnknownProvider(p) => {
                AppError::NotFound(format!("Unknown OAuth provider '{p}'"))
            }
            AuthError::OAuthExchange(msg) => AppError::BadGateway(msg),
            AuthError::ProviderUnavailable(msg) => AppError::ProviderUnavailable(msg),
            AuthError::RateLimitExceeded { retry_after_secs } => {
                AppError::RateLimited { retry_after_secs }
            }
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::UnverifiedEmail => AppError::UnverifiedEmail,
            AuthError::AccountDisabled => AppError::AccountDisabled,
            AuthError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            AuthError::DbError(e) => AppError::Internal(e.to_string()),
            AuthError::Configuration(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let resp = AppError::from(AuthError::Internal("pool exhausted at 10.0.0.3".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "Something went wrong");
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after() {
        let resp = AppError::from(AuthError::RateLimitExceeded {
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "42");
        assert_eq!(body_json(resp).await["error"], "rate_limited");
    }

    #[tokio::test]
    async fn conflict_names_the_field() {
        let resp = AppError::from(AuthError::Conflict { field: "email" }).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["message"], "Email already in use");
    }

    #[test]
    fn provider_failures_map_to_gateway_codes() {
        let e = AppError::from(AuthError::OAuthExchange("bad_verification_code".into()));
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(e.code(), "oauth_failed");
        assert!(!e.message().contains("bad_verification_code"));

        let e = AppError::from(AuthError::ProviderUnavailable("timeout".into()));
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn disabled_accounts_are_forbidden() {
        let e = AppError::from(AuthError::AccountDisabled);
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
        assert_eq!(e.code(), "account_disabled");
    }
}
