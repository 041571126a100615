//! OAuth sign-in orchestration.
//!
//! `initiate` starts a flow by planting a signed state cookie and returning
//! the provider's authorize URL. `handle_callback` checks the state, trades
//! the code for the provider identity and resolves it to a local user:
//!
//! 1. an existing link wins;
//! 2. a flow started while signed in links to that user;
//! 3. a verified email matching an account links to that account;
//! 4. a matching but unverified email is refused;
//! 5. otherwise a new password-less user is created with its link.
//!
//! Deactivated accounts are refused whichever way they are reached.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::state::{self, STATE_TTL, StateCheck};
use super::{MissingEmailPolicy, OAuthUserInfo, ProviderRegistry, placeholder_email, split_name};
use crate::auth::AuthError;
use crate::auth::cookies::{CookieStore, OAUTH_STATE_COOKIE, SESSION_COOKIE};
use crate::auth::jwt::SESSION_TOKEN_TTL;
use crate::auth::service::{record_activity, sanitize_username};
use crate::auth::session::SessionService;
use crate::models::auth::{ActivityKind, ClientMeta, NewUser, OAuthAccount, Session, User};
use crate::notify::{Notifier, welcome_message};
use crate::store::{AuthStore, normalize_email};

/// Where a browser is in the OAuth round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthFlowState {
    Idle,
    AwaitingCallback,
    Completed,
    Failed,
}

impl OAuthFlowState {
    /// Before the callback: whether a flow is pending for these cookies.
    pub fn pending(cookies: &dyn CookieStore) -> Self {
        match cookies.get(OAUTH_STATE_COOKIE) {
            Some(v) if !v.is_empty() => OAuthFlowState::AwaitingCallback,
            _ => OAuthFlowState::Idle,
        }
    }

    /// After the callback.
    pub fn finished<T>(result: &Result<T, AuthError>) -> Self {
        if result.is_ok() {
            OAuthFlowState::Completed
        } else {
            OAuthFlowState::Failed
        }
    }
}

/// How the provider identity was matched to a local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Link already existed.
    Existing,
    /// Linked to the user who started the flow.
    Linked,
    /// Linked to the account owning the same verified email.
    Merged,
    /// New user created.
    New,
}

/// A completed OAuth sign-in.
#[derive(Debug, Clone)]
pub struct OAuthLogin {
    pub token: String,
    pub session: Session,
    pub user: User,
    pub is_new_user: bool,
    pub outcome: LinkOutcome,
}

#[derive(Clone)]
pub struct OAuthService {
    providers: ProviderRegistry,
    store: Arc<dyn AuthStore>,
    sessions: SessionService,
    notifier: Arc<dyn Notifier>,
    missing_email: MissingEmailPolicy,
}

impl OAuthService {
    pub fn new(
        providers: ProviderRegistry,
        store: Arc<dyn AuthStore>,
        sessions: SessionService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            providers,
            store,
            sessions,
            notifier,
            missing_email: MissingEmailPolicy::default(),
        }
    }

    pub fn with_missing_email_policy(mut self, policy: MissingEmailPolicy) -> Self {
        self.missing_email = policy;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Start a flow for `provider_id`. Returns the authorize URL.
    ///
    /// `current_user` is the signed-in user, if any; the callback then links
    /// the provider account to that user.
    pub fn initiate(
        &self,
        provider_id: &str,
        cookies: &mut dyn CookieStore,
        current_user: Option<&str>,
    ) -> Result<String, AuthError> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;

        let (nonce, sealed) = state::seal(self.sessions.issuer(), provider_id, current_user)?;
        let url = provider.authorization_url(&nonce)?;
        cookies.set(OAUTH_STATE_COOKIE, sealed, STATE_TTL);
        debug!(provider = provider_id, linking = current_user.is_some(), "OAuth flow started");
        Ok(url)
    }

    /// Complete a flow. On success the session cookie is set.
    ///
    /// A missing, mismatched or expired state, or one issued for another
    /// provider, fails with `InvalidState` before anything is written.
    pub async fn handle_callback(
        &self,
        provider_id: &str,
        code: &str,
        presented_state: &str,
        cookies: &mut dyn CookieStore,
        meta: &ClientMeta,
    ) -> Result<OAuthLogin, AuthError> {
        let cookie = cookies.get(OAUTH_STATE_COOKIE);
        let flow = match state::check(
            self.sessions.issuer(),
            cookie.as_deref(),
            presented_state,
            provider_id,
        ) {
            StateCheck::Valid(claims) => {
                cookies.remove(OAUTH_STATE_COOKIE);
                claims
            }
            StateCheck::Expired => {
                cookies.remove(OAUTH_STATE_COOKIE);
                return Err(AuthError::InvalidState);
            }
            StateCheck::Missing | StateCheck::Mismatch => return Err(AuthError::InvalidState),
        };

        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;
        if code.is_empty() {
            return Err(AuthError::OAuthExchange("missing authorization code".into()));
        }

        let access_token = provider.exchange_code(code).await?;
        let info = provider.fetch_user_info(&access_token).await?;

        let (user, outcome) = self.resolve_user(&info, flow.uid.as_deref()).await?;

        let issued = self.sessions.start(&user, meta, SESSION_TOKEN_TTL).await?;
        cookies.set(SESSION_COOKIE, issued.token.clone(), SESSION_TOKEN_TTL);
        info!(
            user_id = %user.id,
            provider = provider_id,
            outcome = ?outcome,
            "OAuth sign-in completed"
        );

        Ok(OAuthLogin {
            token: issued.token,
            session: issued.session,
            is_new_user: outcome == LinkOutcome::New,
            user,
            outcome,
        })
    }

    /// Remove the user's link to `provider_id`.
    ///
    /// Refused when it is the only way a password-less account can sign in.
    pub async fn unlink(&self, user_id: &str, provider_id: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user".into()))?;
        let links = self.store.list_oauth_accounts(user_id).await?;
        if !links.iter().any(|l| l.provider_id == provider_id) {
            return Err(AuthError::NotFound(format!("{provider_id} account link")));
        }
        if !user.has_password() && links.len() <= 1 {
            return Err(AuthError::ValidationError(
                "Cannot remove the only sign-in method of this account".into(),
            ));
        }

        self.store.delete_oauth_account(user_id, provider_id).await?;
        record_activity(
            self.store.as_ref(),
            user_id,
            ActivityKind::OAuthUnlink,
            Some(provider_id),
        )
        .await;
        Ok(())
    }

    /// Links of `user_id`.
    pub async fn linked_accounts(&self, user_id: &str) -> Result<Vec<OAuthAccount>, AuthError> {
        self.store.list_oauth_accounts(user_id).await
    }

    // -------------------------------------------------------------------------
    // Identity resolution
    // -------------------------------------------------------------------------

    async fn resolve_user(
        &self,
        info: &OAuthUserInfo,
        linking_user: Option<&str>,
    ) -> Result<(User, LinkOutcome), AuthError> {
        let provider = info.provider.as_str();
        let detail = Some(provider);

        if let Some(link) = self
            .store
            .find_oauth_account(provider, &info.external_id)
            .await?
        {
            if linking_user.is_some_and(|uid| uid != link.user_id) {
                return Err(AuthError::Conflict {
                    field: "provider_account",
                });
            }
            let user = ensure_active(self.user_of(&link).await?)?;
            record_activity(self.store.as_ref(), &user.id, ActivityKind::OAuthLogin, detail).await;
            return Ok((user, LinkOutcome::Existing));
        }

        if let Some(uid) = linking_user {
            let user = self
                .store
                .find_user_by_id(uid)
                .await?
                .ok_or(AuthError::Unauthenticated)?;
            return self.link(ensure_active(user)?, info, LinkOutcome::Linked).await;
        }

        let (email, email_verified) = self.resolve_email(info)?;

        if let Some(existing) = self.store.find_user_by_email(&email).await? {
            if !email_verified {
                debug!(provider, "Refusing to merge on an unverified provider email");
                return Err(AuthError::UnverifiedEmail);
            }
            return self
                .link(ensure_active(existing)?, info, LinkOutcome::Merged)
                .await;
        }

        self.create_user(info, email, email_verified).await
    }

    fn resolve_email(&self, info: &OAuthUserInfo) -> Result<(String, bool), AuthError> {
        match info.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => Ok((normalize_email(email), info.email_verified)),
            None => match self.missing_email {
                MissingEmailPolicy::Reject => Err(AuthError::OAuthExchange(format!(
                    "{} did not return an email address",
                    info.provider
                ))),
                MissingEmailPolicy::Placeholder => {
                    Ok((placeholder_email(&info.provider, &info.external_id), false))
                }
            },
        }
    }

    async fn user_of(&self, link: &OAuthAccount) -> Result<User, AuthError> {
        self.store
            .find_user_by_id(&link.user_id)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("OAuth link {} has no user", link.id)))
    }

    /// Attach the provider account to `user`. A concurrent callback that
    /// created the same link first counts as an existing link.
    async fn link(
        &self,
        user: User,
        info: &OAuthUserInfo,
        outcome: LinkOutcome,
    ) -> Result<(User, LinkOutcome), AuthError> {
        let provider = info.provider.as_str();
        match self
            .store
            .insert_oauth_account(&user.id, provider, &info.external_id)
            .await
        {
            Ok(_) => {
                record_activity(
                    self.store.as_ref(),
                    &user.id,
                    ActivityKind::OAuthLink,
                    Some(provider),
                )
                .await;
                Ok((user, outcome))
            }
            Err(AuthError::Conflict { .. }) => {
                let link = self
                    .store
                    .find_oauth_account(provider, &info.external_id)
                    .await?
                    .ok_or_else(|| AuthError::Internal("OAuth link vanished".into()))?;
                if link.user_id != user.id {
                    return Err(AuthError::Conflict {
                        field: "provider_account",
                    });
                }
                Ok((user, LinkOutcome::Existing))
            }
            Err(e) => Err(e),
        }
    }

    async fn create_user(
        &self,
        info: &OAuthUserInfo,
        email: String,
        email_verified: bool,
    ) -> Result<(User, LinkOutcome), AuthError> {
        let provider = info.provider.as_str();
        let fallback_username = sanitize_username(&format!("{provider}_{}", info.external_id));
        let preferred = info
            .username
            .as_deref()
            .map(sanitize_username)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| fallback_username.clone());
        let username = match self.store.find_user_by_username(&preferred).await? {
            Some(_) => fallback_username.clone(),
            None => preferred,
        };

        let (split_first, split_last) = split_name(&info.name);
        let first_name = Some(info.first_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or(split_first);
        let last_name = Some(info.last_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or(split_last);

        let new_user = NewUser {
            email,
            username: Some(username),
            first_name,
            last_name,
            password_hash: None,
            is_admin: false,
            email_verified,
            avatar_url: info.avatar_url.clone(),
        };

        let result = match self
            .store
            .insert_oauth_user(new_user.clone(), provider, &info.external_id)
            .await
        {
            Err(AuthError::Conflict { field: "username" }) => {
                let retry = NewUser {
                    username: Some(fallback_username),
                    ..new_user
                };
                self.store
                    .insert_oauth_user(retry, provider, &info.external_id)
                    .await
            }
            other => other,
        };

        let user = match result {
            Ok((user, _)) => user,
            Err(AuthError::Conflict {
                field: "provider_account",
            }) => {
                // Another callback for the same account won the race.
                warn!(provider, "OAuth account linked concurrently");
                let link = self
                    .store
                    .find_oauth_account(provider, &info.external_id)
                    .await?
                    .ok_or_else(|| AuthError::Internal("OAuth link vanished".into()))?;
                let user = ensure_active(self.user_of(&link).await?)?;
                return Ok((user, LinkOutcome::Existing));
            }
            Err(e) => return Err(e),
        };

        self.notifier
            .notify(&user.id, &welcome_message(&user.first_name));
        record_activity(
            self.store.as_ref(),
            &user.id,
            ActivityKind::OAuthRegister,
            Some(provider),
        )
        .await;
        Ok((user, LinkOutcome::New))
    }
}

fn ensure_active(user: User) -> Result<User, AuthError> {
    if user.is_active {
        Ok(user)
    } else {
        debug!(user_id = %user.id, "OAuth sign-in for deactivated account");
        Err(AuthError::AccountDisabled)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::auth::cookies::MemoryCookies;
    use crate::auth::jwt::SessionIssuer;
    use crate::notify::TracingNotifier;
    use crate::oauth::OAuthProvider;
    use crate::store::{MemoryAuthStore, OAuthAccountStore, SessionStore, UserStore};

    /// Provider answering from a code → identity table.
    struct FakeProvider {
        id: &'static str,
        identities: Mutex<HashMap<String, OAuthUserInfo>>,
    }

    impl FakeProvider {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                identities: Mutex::new(HashMap::new()),
            }
        }

        fn on_code(&self, code: &str, info: OAuthUserInfo) {
            self.identities
                .lock()
                .unwrap()
                .insert(code.to_string(), info);
        }
    }

    #[async_trait]
    impl OAuthProvider for FakeProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
            Ok(format!("https://idp.test/{}/authorize?state={state}", self.id))
        }

        async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
            if self.identities.lock().unwrap().contains_key(code) {
                Ok(format!("token-{code}"))
            } else {
                Err(AuthError::OAuthExchange("bad code".into()))
            }
        }

        async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo, AuthError> {
            let code = access_token.trim_start_matches("token-");
            self.identities
                .lock()
                .unwrap()
                .get(code)
                .cloned()
                .ok_or_else(|| AuthError::OAuthExchange("unknown token".into()))
        }
    }

    fn identity(provider: &str, id: &str, email: Option<&str>, verified: bool) -> OAuthUserInfo {
        OAuthUserInfo {
            provider: provider.into(),
            external_id: id.into(),
            email: email.map(str::to_string),
            email_verified: verified,
            name: "Grace Brewster Hopper".into(),
            first_name: String::new(),
            last_name: String::new(),
            avatar_url: None,
            username: None,
        }
    }

    struct Fixture {
        store: Arc<MemoryAuthStore>,
        github: Arc<FakeProvider>,
        discord: Arc<FakeProvider>,
        service: OAuthService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryAuthStore::new());
        let issuer = Arc::new(SessionIssuer::new("secret", "rollauth", "rollauth").unwrap());
        let github = Arc::new(FakeProvider::new("github"));
        let discord = Arc::new(FakeProvider::new("discord"));
        let registry = ProviderRegistry::new()
            .with_provider(github.clone())
            .with_provider(discord.clone());
        let sessions = SessionService::new(store.clone(), issuer);
        let service =
            OAuthService::new(registry, store.clone(), sessions, Arc::new(TracingNotifier));
        Fixture {
            store,
            github,
            discord,
            service,
        }
    }

    fn state_param(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    async fn password_user(store: &MemoryAuthStore, email: &str) -> User {
        store
            .insert_user(NewUser {
                email: email.into(),
                username: Some(email.split('@').next().unwrap().into()),
                first_name: "Existing".into(),
                last_name: "User".into(),
                password_hash: Some("$2b$10$placeholderhashvalue".into()),
                is_admin: false,
                email_verified: true,
                avatar_url: None,
            })
            .await
            .unwrap()
    }

    #[test]
    fn unknown_provider_is_rejected_at_initiate() {
        let f = fixture();
        let mut cookies = MemoryCookies::new();
        assert_matches!(
            f.service.initiate("myspace", &mut cookies, None),
            Err(AuthError::UnknownProvider(p)) if p == "myspace"
        );
        assert_eq!(OAuthFlowState::pending(&cookies), OAuthFlowState::Idle);
    }

    #[tokio::test]
    async fn new_user_flow() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("Grace@Navy.mil"), true));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_eq!(OAuthFlowState::pending(&cookies), OAuthFlowState::AwaitingCallback);
        assert_eq!(cookies.max_age(OAUTH_STATE_COOKIE), Some(STATE_TTL));

        let result = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await;
        assert_eq!(OAuthFlowState::finished(&result), OAuthFlowState::Completed);
        let login = result.unwrap();

        assert_eq!(login.outcome, LinkOutcome::New);
        assert!(login.is_new_user);
        assert_eq!(login.user.email, "grace@navy.mil");
        assert_eq!(login.user.username.as_deref(), Some("github_gh-1"));
        assert_eq!(login.user.first_name, "Grace");
        assert_eq!(login.user.last_name, "Brewster Hopper");
        assert!(!login.user.has_password());
        assert!(login.user.is_admin, "first user ever is admin");
        assert!(cookies.get(OAUTH_STATE_COOKIE).is_none());
        assert_eq!(cookies.get(SESSION_COOKIE), Some(login.token.clone()));
        assert!(f.store.find_session(&login.session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_sign_in_reuses_the_link() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("g@x.com"), true));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let first = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();

        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let second = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(second.outcome, LinkOutcome::Existing);
        assert!(!second.is_new_user);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(f.store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn state_mismatch_writes_nothing() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("g@x.com"), true));
        let mut cookies = MemoryCookies::new();
        f.service.initiate("github", &mut cookies, None).unwrap();

        let result = f
            .service
            .handle_callback("github", "c1", "forged", &mut cookies, &ClientMeta::default())
            .await;
        assert_eq!(OAuthFlowState::finished(&result), OAuthFlowState::Failed);
        assert_matches!(result, Err(AuthError::InvalidState));
        assert_eq!(f.store.user_count().await.unwrap(), 0);
        assert_eq!(f.store.oauth_account_count().await, 0);
        assert_eq!(f.store.session_count(), 0);
        assert!(cookies.get(SESSION_COOKIE).is_none());
        // The genuine flow can still complete.
        assert_eq!(OAuthFlowState::pending(&cookies), OAuthFlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn callback_without_state_cookie_is_invalid() {
        let f = fixture();
        let mut cookies = MemoryCookies::new();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", "anything", &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::InvalidState)
        );
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("g@x.com"), true));
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let state = state_param(&url);
        f.service
            .handle_callback("github", "c1", &state, &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", &state, &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::InvalidState)
        );
    }

    #[tokio::test]
    async fn verified_email_merges_into_existing_account() {
        let f = fixture();
        let existing = password_user(&f.store, "grace@navy.mil").await;
        f.github
            .on_code("c1", identity("github", "gh-1", Some("grace@navy.mil"), true));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let login = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(login.outcome, LinkOutcome::Merged);
        assert_eq!(login.user.id, existing.id);
        assert_eq!(f.store.user_count().await.unwrap(), 1);
        assert_eq!(f.store.oauth_account_count().await, 1);
    }

    #[tokio::test]
    async fn unverified_email_is_not_merged() {
        let f = fixture();
        password_user(&f.store, "grace@navy.mil").await;
        f.github
            .on_code("c1", identity("github", "gh-1", Some("grace@navy.mil"), false));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::UnverifiedEmail)
        );
        assert_eq!(f.store.oauth_account_count().await, 0);
        assert_eq!(f.store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn signed_in_flow_links_to_current_user() {
        let f = fixture();
        let me = password_user(&f.store, "me@x.com").await;
        f.github
            .on_code("c1", identity("github", "gh-9", Some("different@x.com"), false));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, Some(&me.id)).unwrap();
        let login = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(login.outcome, LinkOutcome::Linked);
        assert_eq!(login.user.id, me.id);
    }

    #[tokio::test]
    async fn account_linked_elsewhere_cannot_be_claimed() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("owner@x.com"), true));
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        f.service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();

        let other = password_user(&f.store, "other@x.com").await;
        let url = f.service.initiate("github", &mut cookies, Some(&other.id)).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::Conflict { field: "provider_account" })
        );
    }

    #[tokio::test]
    async fn missing_email_follows_policy() {
        let f = fixture();
        f.github.on_code("c1", identity("github", "gh-1", None, false));

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::OAuthExchange(_))
        );
        assert_eq!(f.store.user_count().await.unwrap(), 0);

        let lenient = f
            .service
            .clone()
            .with_missing_email_policy(MissingEmailPolicy::Placeholder);
        let url = lenient.initiate("github", &mut cookies, None).unwrap();
        let login = lenient
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(login.user.email, "gh-1@github.noemail.local");
        assert!(!login.user.email_verified);
    }

    #[tokio::test]
    async fn taken_username_falls_back_to_provider_id() {
        let f = fixture();
        password_user(&f.store, "octocat@x.com").await;
        let mut info = identity("github", "77", Some("new@x.com"), true);
        info.username = Some("octocat".into());
        f.github.on_code("c1", info);

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let login = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(login.user.username.as_deref(), Some("github_77"));
    }

    #[tokio::test]
    async fn failed_exchange_writes_nothing() {
        let f = fixture();
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "bad-code", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::OAuthExchange(_))
        );
        assert_eq!(f.store.user_count().await.unwrap(), 0);
        assert_eq!(f.store.session_count(), 0);
    }

    #[tokio::test]
    async fn unlink_keeps_last_sign_in_method() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("g@x.com"), true));
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let login = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();

        assert_matches!(
            f.service.unlink(&login.user.id, "github").await,
            Err(AuthError::ValidationError(_))
        );
        assert_matches!(
            f.service.unlink(&login.user.id, "discord").await,
            Err(AuthError::NotFound(_))
        );

        let with_password = password_user(&f.store, "pw@x.com").await;
        f.store
            .insert_oauth_account(&with_password.id, "github", "gh-2")
            .await
            .unwrap();
        f.service.unlink(&with_password.id, "github").await.unwrap();
        assert!(f.service.linked_accounts(&with_password.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_from_one_provider_is_refused_by_another() {
        let f = fixture();
        f.discord
            .on_code("c1", identity("discord", "d-1", Some("g@x.com"), true));
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();

        assert_matches!(
            f.service
                .handle_callback("discord", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::InvalidState)
        );
        assert_eq!(f.store.user_count().await.unwrap(), 0);
        assert_eq!(OAuthFlowState::pending(&cookies), OAuthFlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn deactivated_accounts_are_refused() {
        let f = fixture();
        f.github
            .on_code("c1", identity("github", "gh-1", Some("g@x.com"), true));
        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        let first = f
            .service
            .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        f.store.revoke_user_sessions(&first.user.id).await.unwrap();
        f.store.set_user_active(&first.user.id, false).await.unwrap();

        // Existing link.
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::AccountDisabled)
        );

        // Verified email merge.
        let dormant = password_user(&f.store, "dormant@x.com").await;
        f.store.set_user_active(&dormant.id, false).await.unwrap();
        f.github
            .on_code("c2", identity("github", "gh-2", Some("dormant@x.com"), true));
        let url = f.service.initiate("github", &mut cookies, None).unwrap();
        assert_matches!(
            f.service
                .handle_callback("github", "c2", &state_param(&url), &mut cookies, &ClientMeta::default())
                .await,
            Err(AuthError::AccountDisabled)
        );

        assert_eq!(f.store.oauth_account_count().await, 1);
        assert_eq!(f.store.session_count(), 0);
    }

    #[tokio::test]
    async fn provider_usernames_never_look_like_emails() {
        let f = fixture();
        let mut info = identity("discord", "d-1", Some("nelly@x.com"), true);
        info.username = Some("nelly@home".into());
        f.discord.on_code("c1", info);

        let mut cookies = MemoryCookies::new();
        let url = f.service.initiate("discord", &mut cookies, None).unwrap();
        let login = f
            .service
            .handle_callback("discord", "c1", &state_param(&url), &mut cookies, &ClientMeta::default())
            .await
            .unwrap();
        assert_eq!(login.user.username.as_deref(), Some("nelly_home"));
    }
}
