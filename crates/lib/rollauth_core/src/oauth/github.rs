//! GitHub OAuth app.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    OAuthProvider, OAuthUserInfo, ProviderCredentials, ProviderEndpoints, authorize_url,
    exchange_code_form, get_json, split_name,
};
use crate::auth::AuthError;

const DEFAULT_SCOPE: &str = "read:user user:email";

impl ProviderEndpoints {
    pub fn github() -> Self {
        Self {
            authorize_url: "https://github.com/login/oauth/authorize".into(),
            token_url: "https://github.com/login/oauth/access_token".into(),
            userinfo_url: "https://api.github.com/user".into(),
            emails_url: Some("https://api.github.com/user/emails".into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Clone)]
pub struct GitHubProvider {
    creds: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(creds: ProviderCredentials, client: reqwest::Client) -> Self {
        Self {
            creds,
            endpoints: ProviderEndpoints::github(),
            client,
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Primary verified address, else any verified one.
    async fn verified_email(&self, access_token: &str) -> Result<Option<String>, AuthError> {
        let Some(url) = &self.endpoints.emails_url else {
            return Ok(None);
        };
        let emails: Vec<GitHubEmail> = get_json(&self.client, "github", url, access_token).await?;
        let chosen = emails
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| emails.iter().find(|e| e.verified))
            .map(|e| e.email.clone());
        Ok(chosen)
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn id(&self) -> &str {
        "github"
    }

    fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        authorize_url(
            &self.endpoints.authorize_url,
            &self.creds,
            DEFAULT_SCOPE,
            state,
            &[],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        exchange_code_form(
            &self.client,
            "github",
            &self.endpoints.token_url,
            &self.creds,
            code,
        )
        .await
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo, AuthError> {
        let user: GitHubUser = get_json(
            &self.client,
            "github",
            &self.endpoints.userinfo_url,
            access_token,
        )
        .await?;

        // The profile email is whatever the user made public; only the
        // emails listing says whether an address is verified.
        let (email, email_verified) = match self.verified_email(access_token).await {
            Ok(Some(verified)) => (Some(verified), true),
            Ok(None) => (user.email.clone(), false),
            Err(e) if user.email.is_some() => {
                debug!(error = %e, "GitHub email listing unavailable, using profile email");
                (user.email.clone(), false)
            }
            Err(e) => return Err(e),
        };

        let name = user
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user.login.clone());
        let (first_name, last_name) = split_name(&name);

        Ok(OAuthUserInfo {
            provider: "github".into(),
            external_id: user.id.to_string(),
            email,
            email_verified,
            name,
            first_name,
            last_name,
            avatar_url: user.avatar_url,
            username: Some(user.login),
        })
    }
}
