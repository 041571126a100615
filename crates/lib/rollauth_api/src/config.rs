//! API server configuration.

use rollauth_core::auth::AuthError;
use rollauth_core::config::AuthConfig;

/// Default listener address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3100";

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/rollauth";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// Reject tokens whose session row is gone or expired.
    pub cross_check_sessions: bool,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub auth: AuthConfig,
}

impl ApiConfig {
    /// Config around `auth` with default addresses and cross-checking on.
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            pg_connection_url: DEFAULT_DATABASE_URL.into(),
            cross_check_sessions: true,
            trust_forwarded_for: false,
            auth,
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                | Default                               |
    /// |-------------------------|---------------------------------------|
    /// | `BIND_ADDR`             | `127.0.0.1:3100`                      |
    /// | `DATABASE_URL`          | `postgres://localhost:5432/rollauth`  |
    /// | `SESSION_CROSS_CHECK`   | `true`                                |
    /// | `TRUST_PROXY_HEADERS`   | `false`                               |
    ///
    /// Auth settings come from [`AuthConfig::from_env`].
    pub fn from_env() -> Result<Self, AuthError> {
        let cross_check_sessions = env_bool("SESSION_CROSS_CHECK", true)?;
        let trust_forwarded_for = env_bool("TRUST_PROXY_HEADERS", false)?;
        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
            cross_check_sessions,
            trust_forwarded_for,
            auth: AuthConfig::from_env()?,
        })
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, AuthError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<bool>()
            .map_err(|_| AuthError::Configuration(format!("{name}: invalid value '{v}'"))),
        _ => Ok(default),
    }
}
