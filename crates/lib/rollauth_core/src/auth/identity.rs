//! Identity resolution from the session cookie.

use super::AuthError;
use super::cookies::{CookieStore, SESSION_COOKIE};
use super::session::SessionService;
use crate::models::auth::SessionClaims;

/// Claims of the signed-in user, or `None`.
pub async fn current_identity(
    cookies: &dyn CookieStore,
    sessions: &SessionService,
) -> Option<SessionClaims> {
    let token = cookies.get(SESSION_COOKIE)?;
    sessions.validate(&token).await
}

/// Like [`current_identity`] but fails with `Unauthenticated`.
pub async fn require_identity(
    cookies: &dyn CookieStore,
    sessions: &SessionService,
) -> Result<SessionClaims, AuthError> {
    current_identity(cookies, sessions)
        .await
        .ok_or(AuthError::Unauthenticated)
}

/// Signed-in admin, else `Unauthenticated` / `Forbidden`.
pub async fn require_admin(
    cookies: &dyn CookieStore,
    sessions: &SessionService,
) -> Result<SessionClaims, AuthError> {
    let claims = require_identity(cookies, sessions).await?;
    ensure_admin(claims)
}

/// Gate already-resolved claims on the admin flag.
pub fn ensure_admin(claims: SessionClaims) -> Result<SessionClaims, AuthError> {
    if claims.is_admin {
        Ok(claims)
    } else {
        Err(AuthError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;
    use crate::auth::cookies::MemoryCookies;
    use crate::auth::jwt::{SESSION_TOKEN_TTL, SessionIssuer};
    use crate::models::auth::{ClientMeta, NewUser, User};
    use crate::store::{MemoryAuthStore, UserStore};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            username: None,
            first_name: "Test".into(),
            last_name: "User".into(),
            password_hash: None,
            is_admin: false,
            email_verified: true,
            avatar_url: None,
        }
    }

    async fn setup() -> (SessionService, User, User) {
        let store = Arc::new(MemoryAuthStore::new());
        let issuer = Arc::new(SessionIssuer::new("secret", "rollauth", "rollauth").unwrap());
        let admin = store.insert_user(new_user("admin@example.com")).await.unwrap();
        let member = store.insert_user(new_user("member@example.com")).await.unwrap();
        (SessionService::new(store, issuer), admin, member)
    }

    async fn signed_in(sessions: &SessionService, user: &User) -> MemoryCookies {
        let issued = sessions
            .start(user, &ClientMeta::default(), SESSION_TOKEN_TTL)
            .await
            .unwrap();
        let mut cookies = MemoryCookies::new();
        cookies.set(SESSION_COOKIE, issued.token, SESSION_TOKEN_TTL);
        cookies
    }

    #[tokio::test]
    async fn no_cookie_means_no_identity() {
        let (sessions, _, _) = setup().await;
        let cookies = MemoryCookies::new();
        assert!(current_identity(&cookies, &sessions).await.is_none());
        assert_matches!(
            require_identity(&cookies, &sessions).await,
            Err(AuthError::Unauthenticated)
        );
        assert_matches!(
            require_admin(&cookies, &sessions).await,
            Err(AuthError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn tampered_cookie_means_no_identity() {
        let (sessions, _, _) = setup().await;
        let mut cookies = MemoryCookies::new();
        cookies.set(SESSION_COOKIE, "eyJhbGciOiJIUzI1NiJ9.e30.bad".into(), Duration::hours(1));
        assert!(current_identity(&cookies, &sessions).await.is_none());
    }

    #[tokio::test]
    async fn admin_gate() {
        let (sessions, admin, member) = setup().await;

        let cookies = signed_in(&sessions, &admin).await;
        let claims = require_admin(&cookies, &sessions).await.unwrap();
        assert_eq!(claims.sub, admin.id);

        let cookies = signed_in(&sessions, &member).await;
        assert!(require_identity(&cookies, &sessions).await.is_ok());
        assert_matches!(
            require_admin(&cookies, &sessions).await,
            Err(AuthError::Forbidden)
        );
    }
}
