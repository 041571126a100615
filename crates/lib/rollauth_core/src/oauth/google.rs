//! Google OAuth 2.0 client.

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    OAuthProvider, OAuthUserInfo, ProviderCredentials, ProviderEndpoints, authorize_url,
    exchange_code_form, get_json, split_name,
};
use crate::auth::AuthError;

const DEFAULT_SCOPE: &str = "openid email profile";

impl ProviderEndpoints {
    pub fn google() -> Self {
        Self {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
            emails_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    #[serde(default)]
    name: String,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleProvider {
    creds: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(creds: ProviderCredentials, client: reqwest::Client) -> Self {
        Self {
            creds,
            endpoints: ProviderEndpoints::google(),
            client,
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, state: &str) -> Result<String, AuthError> {
        authorize_url(
            &self.endpoints.authorize_url,
            &self.creds,
            DEFAULT_SCOPE,
            state,
            &[("access_type", "offline"), ("prompt", "consent")],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        exchange_code_form(
            &self.client,
            "google",
            &self.endpoints.token_url,
            &self.creds,
            code,
        )
        .await
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo, AuthError> {
        let user: GoogleUser = get_json(
            &self.client,
            "google",
            &self.endpoints.userinfo_url,
            access_token,
        )
        .await?;

        let (split_first, split_last) = split_name(&user.name);
        let first_name = user.given_name.filter(|n| !n.is_empty()).unwrap_or(split_first);
        let last_name = user.family_name.filter(|n| !n.is_empty()).unwrap_or(split_last);

        Ok(OAuthUserInfo {
            provider: "google".into(),
            external_id: user.id,
            email: user.email,
            email_verified: user.verified_email,
            name: user.name,
            first_name,
            last_name,
            avatar_url: user.picture,
            username: None,
        })
    }
}
