//! Discord OAuth2 application.
//!
//! Discord has no first/last name fields; the display name becomes the
//! username and both name parts stay empty.

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    OAuthProvider, OAuthUserInfo, ProviderCredentials, ProviderEndpoints, authorize_url,
    exchange_code_form, get_json,
};
use crate::auth::AuthError;

const DEFAULT_SCOPE: &str = "identify email";
const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";

impl ProviderEndpoints {
    pub fn discord() -> Self {
        Self {
            authorize_url: "https://discord.com/api/oauth2/authorize".into(),
            token_url: "https://discord.com/api/oauth2/token".into(),
            userinfo_url: "https://discord.com/api/users/@me".into(),
            emails_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
    email: Option<String>,
    #[serde(default)]
    verified: bool,
    avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordProvider {
    creds: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: reqwest::Client,
}

impl DiscordProvider {
    pub fn new(creds: ProviderCredentials, client: reqwest::Client) -> Self {
        Self {
            creds,
            endpoints: ProviderEndpoints::discord(),
            client,
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[async_trait]
impl OAuthProvider for DiscordProvider {
    fn id(&self) -> &str {
        "discord"
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
            "discord",
            &self.endpoints.token_url,
            &self.creds,
            code,
        )
        .await
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo, AuthError> {
        let user: DiscordUser = get_json(
            &self.client,
            "discord",
            &self.endpoints.userinfo_url,
            access_token,
        )
        .await?;

        let display = user
            .global_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user.username.clone());
        let avatar_url = user
            .avatar
            .map(|hash| format!("{AVATAR_CDN}/{}/{hash}.png", user.id));

        Ok(OAuthUserInfo {
            provider: "discord".into(),
            external_id: user.id,
            email: user.email,
            email_verified: user.verified,
            name: display.clone(),
            first_name: String::new(),
            last_name: String::new(),
            avatar_url,
            username: Some(display),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::test_support::{creds, serve};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[tokio::test]
    async fn display_name_becomes_username_and_names_stay_empty() {
        let base = serve(Router::new().route(
            "/users/@me",
            get(|| async {
                Json(json!({
                    "id": "80351110224678912",
                    "username": "nelly",
                    "global_name": "Nelly",
                    "email": "nelly@example.com",
                    "verified": true,
                    "avatar": "8342729096ea3675442027381ff50dfe"
                }))
            }),
        ))
        .await;
        let p = DiscordProvider::new(creds(), reqwest::Client::new()).with_endpoints(
            ProviderEndpoints::rooted_at(&base, "/oauth2/authorize", "/oauth2/token", "/users/@me"),
        );

        let info = p.fetch_user_info("t").await.unwrap();
        assert_eq!(info.username.as_deref(), Some("Nelly"));
        assert!(info.first_name.is_empty());
        assert!(info.last_name.is_empty());
        assert!(info.email_verified);
        assert_eq!(
            info.avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/80351110224678912/8342729096ea3675442027381ff50dfe.png")
        );
    }

    #[tokio::test]
    async fn account_without_email_reports_none() {
        let base = serve(Router::new().route(
            "/users/@me",
            get(|| async { Json(json!({"id": "5", "username": "quiet", "avatar": null})) }),
        ))
        .await;
        let p = DiscordProvider::new(creds(), reqwest::Client::new()).with_endpoints(
            ProviderEndpoints::rooted_at(&base, "/oauth2/authorize", "/oauth2/token", "/users/@me"),
        );

        let info = p.fetch_user_info("t").await.unwrap();
        assert!(info.email.is_none());
        assert!(!info.email_verified);
        assert_eq!(info.username.as_deref(), Some("quiet"));
        assert!(info.avatar_url.is_none());
    }
}
