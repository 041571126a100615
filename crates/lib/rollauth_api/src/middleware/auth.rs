//! Identity and client-metadata extractors.
//!
//! A request is authenticated by an `Authorization: Bearer` token or, failing
//! that, by the `token` cookie. Either way the token goes through
//! [`SessionService::validate`](rollauth_core::auth::session::SessionService::validate).

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use rollauth_core::auth::identity::{current_identity, ensure_admin};
use rollauth_core::models::auth::{ClientMeta, SessionClaims};

use crate::AppState;
use crate::error::AppError;

/// The signed-in user, if any.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Option<SessionClaims>);

/// The signed-in user; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct RequireIdentity(pub SessionClaims);

/// A signed-in admin; rejects with 401 or 403 otherwise.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub SessionClaims);

/// Client address and user agent of the request.
#[derive(Debug, Clone)]
pub struct RequestMeta(pub ClientMeta);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn resolve_identity(parts: &Parts, state: &AppState) -> Option<SessionClaims> {
    if let Some(token) = bearer_token(&parts.headers) {
        return state.sessions().validate(token).await;
    }
    let cookies = state.cookies(CookieJar::from_headers(&parts.headers));
    current_identity(&cookies, state.sessions()).await
}

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_identity(parts, state).await))
    }
}

impl FromRequestParts<AppState> for RequireIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve_identity(parts, state)
            .await
            .map(Self)
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))
    }
}

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let RequireIdentity(claims) = RequireIdentity::from_request_parts(parts, state).await?;
        Ok(Self(ensure_admin(claims)?))
    }
}

/// Client address: the first hop of `X-Forwarded-For` when proxy headers are
/// trusted, else the socket peer address.
pub fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if trust_forwarded_for && let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Self(ClientMeta {
            ip_address: client_ip(parts, state.config.trust_forwarded_for),
            user_agent,
        }))
    }
}
