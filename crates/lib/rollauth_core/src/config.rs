//! Auth configuration.
//!
//! Resolved once at startup; the signing secret is never mutated afterwards.

use std::env;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::auth::AuthError;
use crate::auth::jwt::resolve_jwt_secret;
use crate::oauth::{MissingEmailPolicy, ProviderCredentials};

/// Attempt ceiling for one rate-limited flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    /// Key the counter by client IP instead of one global bucket.
    pub per_ip: bool,
}

/// Everything the auth flows need to know about their deployment.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Public base URL of the app, without a trailing slash.
    pub app_url: String,
    /// Accounts registering with this email become admins.
    pub admin_email: Option<String>,
    /// Production deployments mark cookies `Secure`.
    pub production: bool,
    pub login_limit: LimitConfig,
    pub register_limit: LimitConfig,
    pub github: Option<ProviderCredentials>,
    pub google: Option<ProviderCredentials>,
    pub discord: Option<ProviderCredentials>,
    pub missing_email: MissingEmailPolicy,
    /// Timeout applied to every call to an identity provider.
    pub oauth_timeout: std::time::Duration,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("app_url", &self.app_url)
            .field("admin_email", &self.admin_email)
            .field("production", &self.production)
            .field("login_limit", &self.login_limit)
            .field("register_limit", &self.register_limit)
            .field("github", &self.github)
            .field("google", &self.google)
            .field("discord", &self.discord)
            .field("missing_email", &self.missing_email)
            .field("oauth_timeout", &self.oauth_timeout)
            .finish()
    }
}

pub const DEFAULT_APP_URL: &str = "http://localhost:3000";
pub const DEFAULT_TOKEN_PARTY: &str = "rollauth";

impl AuthConfig {
    /// Development defaults around `jwt_secret`, no providers enabled.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            jwt_issuer: DEFAULT_TOKEN_PARTY.into(),
            jwt_audience: DEFAULT_TOKEN_PARTY.into(),
            app_url: DEFAULT_APP_URL.into(),
            admin_email: None,
            production: false,
            login_limit: LimitConfig {
                max_attempts: 5,
                window: Duration::seconds(60),
                per_ip: false,
            },
            register_limit: LimitConfig {
                max_attempts: 10,
                window: Duration::seconds(60),
                per_ip: true,
            },
            github: None,
            google: None,
            discord: None,
            missing_email: MissingEmailPolicy::Reject,
            oauth_timeout: std::time::Duration::from_secs(10),
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                      | Default                  |
    /// |-------------------------------|--------------------------|
    /// | `JWT_SECRET` / `AUTH_SECRET`  | required                 |
    /// | `JWT_ISSUER`, `JWT_AUDIENCE`  | `rollauth`               |
    /// | `APP_URL`                     | `http://localhost:3000`  |
    /// | `ADMIN_EMAIL`                 | unset                    |
    /// | `APP_ENV`                     | `development`            |
    /// | `LOGIN_RATE_LIMIT_MAX`        | `5`                      |
    /// | `LOGIN_RATE_LIMIT_WINDOW_SECS`| `60`                     |
    /// | `LOGIN_RATE_LIMIT_PER_IP`     | `false`                  |
    /// | `REGISTER_RATE_LIMIT_MAX`     | `10`                     |
    /// | `REGISTER_RATE_LIMIT_WINDOW_SECS` | `60`                 |
    /// | `{GITHUB,GOOGLE,DISCORD}_CLIENT_ID` / `_CLIENT_SECRET` | unset |
    /// | `OAUTH_MISSING_EMAIL`         | `reject`                 |
    /// | `OAUTH_TIMEOUT_SECS`          | `10`                     |
    pub fn from_env() -> Result<Self, AuthError> {
        let mut config = Self::new(resolve_jwt_secret()?);

        if let Some(issuer) = env_string("JWT_ISSUER") {
            config.jwt_issuer = issuer;
        }
        if let Some(audience) = env_string("JWT_AUDIENCE") {
            config.jwt_audience = audience;
        }
        if let Some(url) = env_string("APP_URL") {
            config.app_url = url.trim_end_matches('/').to_string();
        }
        config.admin_email = env_string("ADMIN_EMAIL");
        config.production = env_string("APP_ENV").is_some_and(|v| v == "production");

        config.login_limit = LimitConfig {
            max_attempts: env_parse("LOGIN_RATE_LIMIT_MAX", config.login_limit.max_attempts)?,
            window: Duration::seconds(env_parse(
                "LOGIN_RATE_LIMIT_WINDOW_SECS",
                config.login_limit.window.num_seconds(),
            )?),
            per_ip: env_parse("LOGIN_RATE_LIMIT_PER_IP", config.login_limit.per_ip)?,
        };
        config.register_limit = LimitConfig {
            max_attempts: env_parse(
                "REGISTER_RATE_LIMIT_MAX",
                config.register_limit.max_attempts,
            )?,
            window: Duration::seconds(env_parse(
                "REGISTER_RATE_LIMIT_WINDOW_SECS",
                config.register_limit.window.num_seconds(),
            )?),
            per_ip: true,
        };
        if config.login_limit.window <= Duration::zero()
            || config.register_limit.window <= Duration::zero()
        {
            return Err(AuthError::Configuration(
                "rate limit windows must be positive".into(),
            ));
        }

        config.github = provider_from_env("GITHUB", "github", &config.app_url);
        config.google = provider_from_env("GOOGLE", "google", &config.app_url);
        config.discord = provider_from_env("DISCORD", "discord", &config.app_url);
        config.missing_email = env_parse("OAUTH_MISSING_EMAIL", config.missing_email)?;
        config.oauth_timeout =
            std::time::Duration::from_secs(env_parse("OAUTH_TIMEOUT_SECS", 10u64)?);

        Ok(config)
    }

    /// Callback URL registered with a provider.
    pub fn callback_url(&self, provider_id: &str) -> String {
        callback_url(&self.app_url, provider_id)
    }

    /// Whether `email` is the configured admin address (case-insensitive).
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_email
            .as_deref()
            .is_some_and(|admin| admin.trim().eq_ignore_ascii_case(email.trim()))
    }
}

fn callback_url(app_url: &str, provider_id: &str) -> String {
    format!("{app_url}/api/auth/oauth/{provider_id}/callback")
}

/// Non-empty value of an env var.
fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, AuthError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AuthError::Configuration(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

/// A provider is enabled only when both its client id and secret are set.
fn provider_from_env(prefix: &str, id: &str, app_url: &str) -> Option<ProviderCredentials> {
    let client_id = env_string(&format!("{prefix}_CLIENT_ID"))?;
    let client_secret = env_string(&format!("{prefix}_CLIENT_SECRET"))?;
    Some(ProviderCredentials {
        client_id,
        client_secret,
        redirect_uri: callback_url(app_url, id),
        scope: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEARED: [(&str, Option<&str>); 16] = [
        ("AUTH_SECRET", None),
        ("JWT_ISSUER", None),
        ("JWT_AUDIENCE", None),
        ("APP_URL", None),
        ("ADMIN_EMAIL", None),
        ("APP_ENV", None),
        ("LOGIN_RATE_LIMIT_MAX", None),
        ("LOGIN_RATE_LIMIT_WINDOW_SECS", None),
        ("LOGIN_RATE_LIMIT_PER_IP", None),
        ("REGISTER_RATE_LIMIT_MAX", None),
        ("GITHUB_CLIENT_ID", None),
        ("GITHUB_CLIENT_SECRET", None),
        ("GOOGLE_CLIENT_ID", None),
        ("DISCORD_CLIENT_ID", None),
        ("OAUTH_MISSING_EMAIL", None),
        ("OAUTH_TIMEOUT_SECS", None),
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let mut all: Vec<(&str, Option<&str>)> = CLEARED
            .iter()
            .filter(|(k, _)| !vars.iter().any(|(v, _)| v == k))
            .copied()
            .collect();
        all.push(("JWT_SECRET", Some("s3cret")));
        all.extend_from_slice(vars);
        temp_env::with_vars(all, f);
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        with_env(&[], || {
            let config = AuthConfig::from_env().unwrap();
            assert_eq!(config.jwt_secret, "s3cret");
            assert_eq!(config.jwt_issuer, "rollauth");
            assert_eq!(config.app_url, DEFAULT_APP_URL);
            assert!(!config.production);
            assert_eq!(config.login_limit.max_attempts, 5);
            assert_eq!(config.login_limit.window, Duration::seconds(60));
            assert!(!config.login_limit.per_ip);
            assert_eq!(config.register_limit.max_attempts, 10);
            assert!(config.github.is_none());
            assert_eq!(config.missing_email, MissingEmailPolicy::Reject);
        });
    }

    #[test]
    fn missing_secret_fails_startup() {
        temp_env::with_vars(
            [("JWT_SECRET", None::<&str>), ("AUTH_SECRET", None)],
            || {
                assert!(matches!(
                    AuthConfig::from_env(),
                    Err(AuthError::Configuration(_))
                ));
            },
        );
    }

    #[test]
    fn provider_needs_both_id_and_secret() {
        with_env(
            &[
                ("APP_URL", Some("https://app.example.com/")),
                ("GITHUB_CLIENT_ID", Some("gh-id")),
                ("GITHUB_CLIENT_SECRET", Some("gh-secret")),
                ("GOOGLE_CLIENT_ID", Some("only-id")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                let github = config.github.expect("github enabled");
                assert_eq!(github.client_id, "gh-id");
                assert_eq!(
                    github.redirect_uri,
                    "https://app.example.com/api/auth/oauth/github/callback"
                );
                assert!(config.google.is_none());
            },
        );
    }

    #[test]
    fn invalid_numbers_are_configuration_errors() {
        with_env(&[("LOGIN_RATE_LIMIT_MAX", Some("lots"))], || {
            assert!(matches!(
                AuthConfig::from_env(),
                Err(AuthError::Configuration(_))
            ));
        });
        with_env(&[("LOGIN_RATE_LIMIT_WINDOW_SECS", Some("0"))], || {
            assert!(matches!(
                AuthConfig::from_env(),
                Err(AuthError::Configuration(_))
            ));
        });
    }

    #[test]
    fn production_and_policy_flags() {
        with_env(
            &[
                ("APP_ENV", Some("production")),
                ("OAUTH_MISSING_EMAIL", Some("placeholder")),
                ("LOGIN_RATE_LIMIT_PER_IP", Some("true")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert!(config.production);
                assert!(config.login_limit.per_ip);
                assert_eq!(config.missing_email, MissingEmailPolicy::Placeholder);
            },
        );
    }

    #[test]
    fn admin_email_matches_case_insensitively() {
        let mut config = AuthConfig::new("s");
        assert!(!config.is_admin_email("boss@example.com"));
        config.admin_email = Some("Boss@Example.com".into());
        assert!(config.is_admin_email("boss@example.COM"));
        assert!(!config.is_admin_email("other@example.com"));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let rendered = format!("{:?}", AuthConfig::new("super-secret-value"));
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
