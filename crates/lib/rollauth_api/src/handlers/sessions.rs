//! Session management for the signed-in user.

use axum::Json;
use axum::extract::{Path, State};
use axum_extra::extract::CookieJar;
use rollauth_core::auth::cookies::{CookieStore, SESSION_COOKIE};
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::RequireIdentity;
use crate::models::{RevokeAllResponse, SessionResponse, SuccessResponse};

/// `GET /api/auth/sessions`: the caller's sessions, newest first.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
) -> AppResult<Json<Vec<SessionResponse>>> {
    let sessions = state.sessions().list(&claims.sub).await?;
    Ok(Json(
        sessions
            .iter()
            .map(|s| SessionResponse::new(s, &claims.sid))
            .collect(),
    ))
}

/// `DELETE /api/auth/sessions/{id}`: revoke one of the caller's sessions.
///
/// Revoking the current session also clears the cookie.
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
    Path(id): Path<String>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<SuccessResponse>)> {
    let not_found = || AppError::NotFound("Session not found".into());
    let session_id = Uuid::parse_str(&id).map_err(|_| not_found())?.to_string();

    if !state
        .sessions()
        .revoke_for_user(&claims.sub, &session_id)
        .await?
    {
        return Err(not_found());
    }
    info!(user_id = %claims.sub, session_id = %session_id, "Session revoked");

    let mut cookies = state.cookies(jar);
    if session_id == claims.sid {
        cookies.remove(SESSION_COOKIE);
    }
    Ok((cookies.into_jar(), Json(SuccessResponse::ok())))
}

/// `POST /api/auth/sessions/revoke-all`: sign out everywhere.
pub async fn revoke_all_handler(
    State(state): State<AppState>,
    RequireIdentity(claims): RequireIdentity,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<RevokeAllResponse>)> {
    let revoked = state.sessions().revoke_all(&claims.sub).await?;
    info!(user_id = %claims.sub, revoked, "All sessions revoked");

    let mut cookies = state.cookies(jar);
    cookies.remove(SESSION_COOKIE);
    Ok((cookies.into_jar(), Json(RevokeAllResponse { revoked })))
}
