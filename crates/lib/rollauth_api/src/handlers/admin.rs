//! Admin-only views over users and their activity.

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::RequireAdmin;
use crate::models::{ActivityQuery, ActivityResponse, UserResponse, UserStatusRequest};

const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
const MAX_ACTIVITY_LIMIT: i64 = 200;

/// `GET /api/admin/users`: all users.
pub async fn list_users_handler(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<Json<Vec<UserResponse>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

fn user_not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

/// `GET /api/admin/users/{id}/activity`: a user's recent activity.
pub async fn user_activity_handler(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<ActivityResponse>>> {
    let user_id = Uuid::parse_str(&id).map_err(|_| user_not_found())?.to_string();
    if state.store.find_user_by_id(&user_id).await?.is_none() {
        return Err(user_not_found());
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    let entries = state.store.list_activity(&user_id, limit).await?;
    Ok(Json(entries.iter().map(ActivityResponse::from).collect()))
}

/// `POST /api/admin/users/{id}/status`: deactivate or reactivate an account.
pub async fn user_status_handler(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<String>,
    Json(body): Json<UserStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    let user_id = Uuid::parse_str(&id)
        .map_err(|_| user_not_found())?
        .to_string();
    let user = state.auth.set_active(&admin, &user_id, body.is_active).await?;
    Ok(Json(UserResponse::from(&user)))
}
