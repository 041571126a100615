//! Password registration, login and logout.

use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use super::AuthError;
use super::cookies::{CookieStore, SESSION_COOKIE};
use super::jwt::{SESSION_TOKEN_TTL, SHORT_TOKEN_TTL};
use super::password::{MIN_PASSWORD_LEN, hash_password, hash_password_blocking, verify_password_blocking};
use super::session::SessionService;
use crate::config::AuthConfig;
use crate::models::auth::{ActivityKind, ClientMeta, NewUser, Session, SessionClaims, User};
use crate::notify::{Notifier, welcome_message};
use crate::rate_limit::{RateLimitDecision, RateLimiter, retry_after_secs};
use crate::store::{AuthStore, normalize_email};

/// Minimum username length.
pub const MIN_USERNAME_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    /// Email address or username.
    pub login: String,
    pub password: String,
}

/// A successful password login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub session: Session,
    pub token: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_registration(input: &RegisterInput) -> Result<(), AuthError> {
    if input.first_name.trim().is_empty() {
        return Err(AuthError::ValidationError("First name is required".into()));
    }
    if input.last_name.trim().is_empty() {
        return Err(AuthError::ValidationError("Last name is required".into()));
    }
    if !looks_like_email(&input.email) {
        return Err(AuthError::ValidationError("Invalid email address".into()));
    }
    if input.username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(AuthError::ValidationError(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if input.username.contains('@') {
        return Err(AuthError::ValidationError(
            "Username must not contain '@'".into(),
        ));
    }
    validate_password(&input.password)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Username derived from a provider profile, made safe for login lookups.
pub(crate) fn sanitize_username(raw: &str) -> String {
    raw.trim().replace('@', "_")
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Record activity; failures are logged and otherwise ignored.
pub(crate) async fn record_activity(
    store: &dyn AuthStore,
    user_id: &str,
    kind: ActivityKind,
    detail: Option<&str>,
) {
    if let Err(e) = store.record_activity(user_id, kind, detail).await {
        warn!(error = %e, user_id = %user_id, kind = %kind, "Failed to record activity");
    }
}

/// Hash compared against when the account does not exist, so unknown users
/// cost the same bcrypt work as wrong passwords.
fn dummy_hash() -> Option<&'static str> {
    static HASH: OnceLock<Option<String>> = OnceLock::new();
    HASH.get_or_init(|| hash_password("rollauth-timing-equalizer").ok())
        .as_deref()
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    sessions: SessionService,
    notifier: Arc<dyn Notifier>,
    login_limiter: Arc<RateLimiter>,
    register_limiter: Arc<RateLimiter>,
    config: Arc<AuthConfig>,
}

impl AuthService {
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<dyn AuthStore>,
        sessions: SessionService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let login_limiter = Arc::new(RateLimiter::new(
            config.login_limit.max_attempts,
            config.login_limit.window,
        ));
        let register_limiter = Arc::new(RateLimiter::new(
            config.register_limit.max_attempts,
            config.register_limit.window,
        ));
        Self {
            store,
            sessions,
            notifier,
            login_limiter,
            register_limiter,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Limiters, for periodic pruning.
    pub fn limiters(&self) -> Vec<Arc<RateLimiter>> {
        vec![self.login_limiter.clone(), self.register_limiter.clone()]
    }

    fn login_key(&self, meta: &ClientMeta) -> String {
        match (&meta.ip_address, self.config.login_limit.per_ip) {
            (Some(ip), true) => format!("login:{ip}"),
            _ => "login".to_string(),
        }
    }

    fn register_key(meta: &ClientMeta) -> String {
        match &meta.ip_address {
            Some(ip) => format!("register:{ip}"),
            None => "register".to_string(),
        }
    }

    fn enforce(limiter: &RateLimiter, key: &str) -> Result<(), AuthError> {
        match limiter.check(key) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { retry_after } => {
                debug!(key, "Rate limit exceeded");
                Err(AuthError::RateLimitExceeded {
                    retry_after_secs: retry_after_secs(retry_after),
                })
            }
        }
    }

    /// Create a password account.
    ///
    /// The account is admin when it is the first one or its email equals the
    /// configured admin address.
    pub async fn register(
        &self,
        input: RegisterInput,
        meta: &ClientMeta,
    ) -> Result<User, AuthError> {
        validate_registration(&input)?;
        Self::enforce(&self.register_limiter, &Self::register_key(meta))?;

        let email = normalize_email(&input.email);
        let username = input.username.trim().to_string();

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict { field: "email" });
        }
        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(AuthError::Conflict { field: "username" });
        }

        let password_hash = hash_password_blocking(input.password).await?;

        let user = self
            .store
            .insert_user(NewUser {
                is_admin: self.config.is_admin_email(&email),
                email,
                username: Some(username),
                first_name: input.first_name.trim().to_string(),
                last_name: input.last_name.trim().to_string(),
                password_hash: Some(password_hash),
                email_verified: false,
                avatar_url: None,
            })
            .await?;

        info!(user_id = %user.id, is_admin = user.is_admin, "User registered");
        self.notifier
            .notify(&user.id, &welcome_message(&user.first_name));
        record_activity(self.store.as_ref(), &user.id, ActivityKind::Register, None).await;

        Ok(user)
    }

    /// Password sign-in. On success the session token is written to `cookies`.
    ///
    /// Unknown login, password-less or deactivated account and wrong password
    /// all yield the same `InvalidCredentials`.
    pub async fn login(
        &self,
        input: LoginInput,
        meta: &ClientMeta,
        cookies: &mut dyn CookieStore,
    ) -> Result<LoginSuccess, AuthError> {
        Self::enforce(&self.login_limiter, &self.login_key(meta))?;

        let login = input.login.trim();
        let user = self.store.find_user_by_login(login).await?;

        let Some(user) = user else {
            if let Some(hash) = dummy_hash() {
                let _ = verify_password_blocking(input.password, hash.to_string()).await;
            }
            debug!("Login for unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        let verified = match user.password_hash.as_deref().filter(|h| !h.is_empty()) {
            Some(hash) => verify_password_blocking(input.password, hash.to_string()).await?,
            None => false,
        };
        if verified && !user.is_active {
            debug!(user_id = %user.id, "Login for deactivated account");
        }
        if !verified || !user.is_active {
            record_activity(
                self.store.as_ref(),
                &user.id,
                ActivityKind::LoginFailure,
                meta.ip_address.as_deref(),
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        }

        let issued = self.sessions.start(&user, meta, SESSION_TOKEN_TTL).await?;
        cookies.set(SESSION_COOKIE, issued.token.clone(), SESSION_TOKEN_TTL);
        record_activity(
            self.store.as_ref(),
            &user.id,
            ActivityKind::Login,
            meta.ip_address.as_deref(),
        )
        .await;
        info!(user_id = %user.id, session_id = %issued.session.id, "User signed in");

        Ok(LoginSuccess {
            user,
            session: issued.session,
            token: issued.token,
        })
    }

    /// Sign out: revoke the session behind the cookie and clear it.
    ///
    /// Idempotent; succeeds with no cookie or an already revoked session.
    /// The cookie is cleared even when revoking the row fails.
    pub async fn logout(&self, cookies: &mut dyn CookieStore) -> Result<(), AuthError> {
        let token = cookies.get(SESSION_COOKIE);
        cookies.remove(SESSION_COOKIE);
        let Some(token) = token else {
            return Ok(());
        };

        let claims = self.sessions.issuer().decode_ignoring_expiry(&token);
        if self.sessions.revoke_by_token(&token).await?
            && let Some(claims) = claims
        {
            record_activity(self.store.as_ref(), &claims.sub, ActivityKind::Logout, None).await;
        }
        Ok(())
    }

    /// Short-lived bearer token for API clients, bound to the same session.
    pub fn mint_short_token(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        self.sessions.mint(claims, SHORT_TOKEN_TTL)
    }

    /// Replace the caller's password after checking the current one.
    ///
    /// Every other session of the user is revoked; the session in `claims`
    /// stays signed in. Returns how many sessions were revoked.
    pub async fn change_password(
        &self,
        claims: &SessionClaims,
        current_password: String,
        new_password: String,
    ) -> Result<u64, AuthError> {
        validate_password(&new_password)?;
        let user = self
            .store
            .find_user_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let verified = match user.password_hash.as_deref().filter(|h| !h.is_empty()) {
            Some(hash) => verify_password_blocking(current_password, hash.to_string()).await?,
            None => false,
        };
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = hash_password_blocking(new_password).await?;
        if !self.store.update_password_hash(&user.id, &hash).await? {
            return Err(AuthError::NotFound("user".into()));
        }

        let mut revoked = 0;
        for session in self.sessions.list(&user.id).await? {
            if session.id != claims.sid && self.store.revoke_session(&session.id).await? {
                revoked += 1;
            }
        }
        record_activity(self.store.as_ref(), &user.id, ActivityKind::PasswordChange, None).await;
        info!(user_id = %user.id, revoked, "Password changed");
        Ok(revoked)
    }

    /// Deactivate or reactivate an account on behalf of an admin.
    ///
    /// Deactivation revokes every session of the account. Admins cannot
    /// deactivate themselves.
    pub async fn set_active(
        &self,
        admin: &SessionClaims,
        user_id: &str,
        active: bool,
    ) -> Result<User, AuthError> {
        if !active && admin.sub == user_id {
            return Err(AuthError::ValidationError(
                "You cannot deactivate your own account".into(),
            ));
        }
        if !self.store.set_user_active(user_id, active).await? {
            return Err(AuthError::NotFound("user".into()));
        }
        let (kind, revoked) = if active {
            (ActivityKind::Reactivated, 0)
        } else {
            (ActivityKind::Deactivated, self.sessions.revoke_all(user_id).await?)
        };
        record_activity(self.store.as_ref(), user_id, kind, Some(&admin.sub)).await;
        info!(user_id, admin_id = %admin.sub, active, revoked, "Account status changed");

        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user".into()))
    }
}
