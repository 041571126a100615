//! Password registration, login and session token handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_extra::extract::CookieJar;
use rollauth_core::auth::jwt::SHORT_TOKEN_TTL;
use rollauth_core::auth::service::{LoginInput, RegisterInput};
use tracing::warn;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::{RequestMeta, RequireIdentity};
use crate::models::{
    ChangePasswordRequest, ChangePasswordResponse, LoginRequest, LoginResponse, MeResponse,
    RegisterRequest, RegisterResponse, SuccessResponse, TokenResponse, UserResponse,
};

/// `POST /api/auth/register`: create a password account.
pub async fn register_handler(
    State(state): State<AppState>,
    RequestMeta(meta): RequestMeta,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let user = state
        .auth
        .register(
            RegisterInput {
                email: body.email,
                username: body.username,
                first_name: body.first_name,
                last_name: body.last_name,
                password: body.password,
            },
            &meta,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            is_admin: user.is_admin,
        }),
    ))
}

/// `POST /api/auth/login`: password sign-in; sets the session cookie.
pub async fn login_handler(
    State(state): State<AppState>,
    RequestMeta(meta): RequestMeta,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let mut cookies = state.cookies(jar);
    let success = state
        .auth
        .login(
            LoginInput {
                login: body.login,
                password: body.password,
            },
            &meta,
            &mut cookies,
        )
        .await?;
    Ok((
        cookies.into_jar(),
        Json(LoginResponse {
            user: UserResponse::from(&success.user),
            expires_at: success.session.expires_at,
        }),
    ))
}

/// `POST /api/auth/logout`: revoke the current session and clear the cookie.
///
/// Always reports success; revocation failures are only logged.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<SuccessResponse>) {
    let mut cookies = state.cookies(jar);
    if let Err(e) = state.auth.logout(&mut cookies).await {
        warn!(error = %e, "Logout could not revoke the session row");
    }
    (cookies.into_jar(), Json(SuccessResponse::ok()))
}

/// `GET /api/auth/me`: identity of the caller.
pub async fn me_handler(RequireIdentity(claims): RequireIdentity) -> Json<MeResponse> {
    Json(MeResponse::from(&claims))
}

/// `POST /api/auth/token`: short-lived bearer token for the caller's session.
pub async fn token_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
) -> AppResult<Json<TokenResponse>> {
    let access_token = state.auth.mint_short_token(&claims)?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".into(),
        expires_in: SHORT_TOKEN_TTL.num_seconds(),
    }))
}

/// `POST /api/auth/password`: change the caller's password.
///
/// The caller stays signed in; their other sessions are revoked.
pub async fn change_password_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<ChangePasswordResponse>> {
    let revoked_sessions = state
        .auth
        .change_password(&claims, body.current_password, body.new_password)
        .await?;
    Ok(Json(ChangePasswordResponse {
        success: true,
        revoked_sessions,
    }))
}
