//! Session lifecycle: create, validate, list and revoke.
//!
//! A token is the primary credential; the session row lets a user see and
//! revoke their sign-ins. With cross-checking on, a token whose row is gone
//! or expired is rejected even while its signature is still valid.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::AuthError;
use super::jwt::SessionIssuer;
use crate::models::auth::{ClientMeta, Session, SessionClaims, SessionPayload, User};
use crate::store::AuthStore;

/// A freshly created session and its signed token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn AuthStore>,
    issuer: Arc<SessionIssuer>,
    cross_check: bool,
}

impl SessionService {
    /// Service with store cross-checking enabled.
    pub fn new(store: Arc<dyn AuthStore>, issuer: Arc<SessionIssuer>) -> Self {
        Self {
            store,
            issuer,
            cross_check: true,
        }
    }

    pub fn with_cross_check(mut self, enabled: bool) -> Self {
        self.cross_check = enabled;
        self
    }

    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    /// Create a session row for `user` and sign a token bound to it.
    pub async fn start(
        &self,
        user: &User,
        meta: &ClientMeta,
        ttl: Duration,
    ) -> Result<IssuedSession, AuthError> {
        let session = self.store.create_session(&user.id, meta, ttl).await?;
        let payload = SessionPayload::for_session(user, &session);
        match self.issuer.issue(&payload, ttl) {
            Ok(token) => Ok(IssuedSession { token, session }),
            Err(e) => {
                if let Err(revoke_err) = self.store.revoke_session(&session.id).await {
                    warn!(error = %revoke_err, session_id = %session.id, "Failed to drop unsigned session");
                }
                Err(e)
            }
        }
    }

    /// Verify `token`; with cross-checking, also require a live session row
    /// owned by an active user.
    ///
    /// Never errors: every failure yields `None`.
    pub async fn validate(&self, token: &str) -> Option<SessionClaims> {
        let claims = self.issuer.verify(token)?;
        if !self.cross_check {
            return Some(claims);
        }

        let session = match self.store.find_session(&claims.sid).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session_id = %claims.sid, "Token refers to a revoked session");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed during validation");
                return None;
            }
        };
        if session.user_id != claims.sub || !session.is_active_at(Utc::now()) {
            return None;
        }
        match self.store.find_user_by_id(&claims.sub).await {
            Ok(Some(user)) if user.is_active => {}
            Ok(_) => {
                debug!(user_id = %claims.sub, "Token belongs to a missing or deactivated user");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "User lookup failed during validation");
                return None;
            }
        }
        if let Err(e) = self.store.touch_session(&session.id).await {
            warn!(error = %e, session_id = %session.id, "Failed to update session last_used_at");
        }
        Some(claims)
    }

    /// Revoke the session a token refers to, even if the token has expired.
    ///
    /// Tokens that fail signature checks are a no-op. Returns whether a row
    /// was removed.
    pub async fn revoke_by_token(&self, token: &str) -> Result<bool, AuthError> {
        let Some(claims) = self.issuer.decode_ignoring_expiry(token) else {
            return Ok(false);
        };
        self.store.revoke_session(&claims.sid).await
    }

    /// Sessions of `user_id`, newest first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        self.store.list_sessions(user_id).await
    }

    /// Revoke one of `user_id`'s sessions. Sessions of other users are
    /// treated as absent.
    pub async fn revoke_for_user(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool, AuthError> {
        match self.store.find_session(session_id).await? {
            Some(session) if session.user_id == user_id => {
                self.store.revoke_session(session_id).await
            }
            _ => Ok(false),
        }
    }

    /// Revoke every session of `user_id`.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, AuthError> {
        self.store.revoke_user_sessions(user_id).await
    }

    /// Sign another token for the session behind `claims`.
    pub fn mint(&self, claims: &SessionClaims, ttl: Duration) -> Result<String, AuthError> {
        self.issuer.issue(&claims.payload(), ttl)
    }
}
