//! OAuth sign-in: provider abstraction, registry and the callback orchestrator.
//!
//! Each provider turns an authorization code into a normalized
//! [`OAuthUserInfo`]; [`service::OAuthService`] resolves that identity to a
//! local user and issues a session.

pub mod discord;
pub mod github;
pub mod google;
pub mod service;
pub mod state;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::AuthError;
use crate::config::AuthConfig;

pub use discord::DiscordProvider;
pub use github::GitHubProvider;
pub use google::GoogleProvider;

/// Identity reported by a provider, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthUserInfo {
    /// Provider id (`github`, `google`, `discord`).
    pub provider: String,
    /// Account id at the provider.
    pub external_id: String,
    pub email: Option<String>,
    /// Whether the provider vouches for `email`.
    pub email_verified: bool,
    /// Display name; may be empty.
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub username: Option<String>,
}

/// An external identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Stable provider id used in routes and stored links.
    fn id(&self) -> &str;

    /// URL the browser is sent to, carrying `state`.
    fn authorization_url(&self, state: &str) -> Result<String, AuthError>;

    /// Exchange an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError>;

    /// Fetch the account behind `access_token`.
    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo, AuthError>;
}

/// OAuth application credentials for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Overrides the provider's default scope.
    pub scope: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Endpoint URLs of a provider. Overridable so tests can point at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Secondary email listing (GitHub only).
    pub emails_url: Option<String>,
}

impl ProviderEndpoints {
    /// All endpoints under one base URL, using the given paths.
    pub fn rooted_at(base: &str, authorize: &str, token: &str, userinfo: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{base}{authorize}"),
            token_url: format!("{base}{token}"),
            userinfo_url: format!("{base}{userinfo}"),
            emails_url: None,
        }
    }
}

/// What to do when a provider reports no email address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingEmailPolicy {
    /// Fail the sign-in.
    #[default]
    Reject,
    /// Use `{external_id}@{provider}.noemail.local`, marked unverified.
    Placeholder,
}

impl FromStr for MissingEmailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(MissingEmailPolicy::Reject),
            "placeholder" => Ok(MissingEmailPolicy::Placeholder),
            other => Err(format!("expected 'reject' or 'placeholder', got '{other}'")),
        }
    }
}

/// Placeholder address for an account without email.
pub fn placeholder_email(provider: &str, external_id: &str) -> String {
    format!("{external_id}@{provider}.noemail.local")
}

/// Registered providers, keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider whose credentials are configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = http_client(config.oauth_timeout)?;
        let mut registry = Self::new();
        if let Some(creds) = &config.github {
            registry.insert(Arc::new(GitHubProvider::new(creds.clone(), client.clone())));
        }
        if let Some(creds) = &config.google {
            registry.insert(Arc::new(GoogleProvider::new(creds.clone(), client.clone())));
        }
        if let Some(creds) = &config.discord {
            registry.insert(Arc::new(DiscordProvider::new(creds.clone(), client)));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// =============================================================================
// Shared HTTP plumbing
// =============================================================================

/// HTTP client for provider calls. GitHub rejects requests without a User-Agent.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("rollauth/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AuthError::Configuration(format!("http client: {e}")))
}

/// Timeouts and connection failures are transient; anything else is a
/// failed exchange.
fn transport_error(provider: &str, e: reqwest::Error) -> AuthError {
    if e.is_timeout() || e.is_connect() {
        AuthError::ProviderUnavailable(format!("{provider}: {e}"))
    } else {
        AuthError::OAuthExchange(format!("{provider}: {e}"))
    }
}

/// Build an authorize URL with the standard query parameters plus `extra`.
fn authorize_url(
    endpoint: &str,
    creds: &ProviderCredentials,
    default_scope: &str,
    state: &str,
    extra: &[(&str, &str)],
) -> Result<String, AuthError> {
    let scope = creds.scope.as_deref().unwrap_or(default_scope);
    let mut params: Vec<(&str, &str)> = vec![
        ("client_id", creds.client_id.as_str()),
        ("redirect_uri", creds.redirect_uri.as_str()),
        ("scope", scope),
        ("state", state),
        ("response_type", "code"),
    ];
    params.extend_from_slice(extra);
    url::Url::parse_with_params(endpoint, &params)
        .map(String::from)
        .map_err(|e| AuthError::Configuration(format!("authorize url '{endpoint}': {e}")))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Form-POST the authorization code to the token endpoint.
async fn exchange_code_form(
    client: &reqwest::Client,
    provider: &str,
    token_url: &str,
    creds: &ProviderCredentials,
    code: &str,
) -> Result<String, AuthError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("redirect_uri", creds.redirect_uri.as_str()),
    ];

    let resp = client
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        debug!(provider, %status, "Token endpoint rejected the code");
        return Err(AuthError::OAuthExchange(format!(
            "{provider}: token endpoint returned HTTP {status}"
        )));
    }

    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| AuthError::OAuthExchange(format!("{provider}: token response: {e}")))?;

    match body.access_token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => {
            let reason = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| "no access_token in response".into());
            Err(AuthError::OAuthExchange(format!("{provider}: {reason}")))
        }
    }
}

/// GET a JSON resource with the access token as bearer credential.
async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    access_token: &str,
) -> Result<T, AuthError> {
    let resp = client
        .get(url)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AuthError::OAuthExchange(format!(
            "{provider}: {url} returned HTTP {status}"
        )));
    }

    resp.json()
        .await
        .map_err(|e| AuthError::OAuthExchange(format!("{provider}: user info: {e}")))
}

/// Split a display name into first name and the remainder.
pub fn split_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, rest)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Throwaway HTTP server standing in for a provider.

    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn creds() -> super::ProviderCredentials {
        super::ProviderCredentials {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            redirect_uri: "http://localhost:3000/api/auth/oauth/test/callback".into(),
            scope: None,
        }
    }
}
