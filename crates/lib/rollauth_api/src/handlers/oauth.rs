//! OAuth sign-in, callback and account-link handlers.
//!
//! The start and callback endpoints are browser navigations: they answer
//! with `303 See Other`, and callback failures land on the login page with
//! an `error` code rather than a JSON body.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use rollauth_core::auth::AuthError;
use rollauth_core::auth::cookies::{CookieStore, OAUTH_STATE_COOKIE};
use rollauth_core::oauth::service::OAuthFlowState;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{CurrentIdentity, RequestMeta, RequireIdentity};
use crate::models::{LinkedAccountResponse, OAuthCallbackQuery, SuccessResponse};

/// Code used when the user declines at the provider.
const ACCESS_DENIED: &str = "access_denied";

fn dashboard_url(app_url: &str) -> String {
    format!("{app_url}/dashboard")
}

fn login_error_url(app_url: &str, code: &str) -> String {
    format!("{app_url}/login?error={code}")
}

/// `GET /api/auth/oauth/{provider}`: redirect to the provider.
///
/// A signed-in caller links the provider account instead of signing in.
pub async fn start_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    CurrentIdentity(identity): CurrentIdentity,
    jar: CookieJar,
) -> AppResult<(CookieJar, Redirect)> {
    let mut cookies = state.cookies(jar);
    let current_user = identity.as_ref().map(|c| c.sub.as_str());
    let url = state.oauth.initiate(&provider, &mut cookies, current_user)?;
    Ok((cookies.into_jar(), Redirect::to(&url)))
}

/// `GET /api/auth/oauth/{provider}/callback`: finish the flow.
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    RequestMeta(meta): RequestMeta,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let app_url = state.config.auth.app_url.as_str();
    let mut cookies = state.cookies(jar);

    if let Some(reason) = query.error.as_deref() {
        info!(provider = %provider, reason, "Provider reported an error on callback");
        cookies.remove(OAUTH_STATE_COOKIE);
        return (
            cookies.into_jar(),
            Redirect::to(&login_error_url(app_url, ACCESS_DENIED)),
        );
    }

    let before = OAuthFlowState::pending(&cookies);
    let result = state
        .oauth
        .handle_callback(
            &provider,
            query.code.as_deref().unwrap_or_default(),
            query.state.as_deref().unwrap_or_default(),
            &mut cookies,
            &meta,
        )
        .await;
    debug!(
        provider = %provider,
        from = ?before,
        to = ?OAuthFlowState::finished(&result),
        "OAuth flow transition"
    );

    let target = match result {
        Ok(login) => {
            if login.is_new_user {
                info!(user_id = %login.user.id, provider = %provider, "New account via OAuth");
            }
            dashboard_url(app_url)
        }
        Err(e) => {
            if e.is_retryable() {
                warn!(provider = %provider, error = %e, "OAuth callback failed");
            } else if matches!(e, AuthError::DbError(_) | AuthError::Internal(_)) {
                error!(provider = %provider, error = %e, "OAuth callback failed");
            } else {
                info!(provider = %provider, error = %e, "OAuth callback rejected");
            }
            login_error_url(app_url, AppError::from(e).code())
        }
    };
    (cookies.into_jar(), Redirect::to(&target))
}

/// `DELETE /api/auth/oauth/{provider}`: unlink a provider from the caller.
pub async fn unlink_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
    Path(provider): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    state.oauth.unlink(&claims.sub, &provider).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// `GET /api/auth/accounts`: providers linked to the caller.
pub async fn linked_accounts_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
) -> AppResult<Json<Vec<LinkedAccountResponse>>> {
    let accounts = state.oauth.linked_accounts(&claims.sub).await?;
    Ok(Json(
        accounts.iter().map(LinkedAccountResponse::from).collect(),
    ))
}
