//! Session token issuance and verification (HS256 JWT).

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::AuthError;
use crate::models::auth::{SessionClaims, SessionPayload};

/// Lifetime of the session token set at password or OAuth login: 7 days.
pub const SESSION_TOKEN_TTL: Duration = Duration::days(7);

/// Lifetime of bearer tokens minted for API clients: 1 hour.
pub const SHORT_TOKEN_TTL: Duration = Duration::hours(1);

/// Mints and verifies signed session tokens.
///
/// The signing secret is fixed at construction and never mutated, so one
/// issuer is shared by every request.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    /// Build an issuer. An empty secret is a configuration error.
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "session signing secret is missing or empty".into(),
            ));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sign `payload` into a token that expires after `ttl`.
    pub fn issue(&self, payload: &SessionPayload, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: payload.user_id.clone(),
            email: payload.email.clone(),
            first_name: payload.first_name.clone(),
            last_name: payload.last_name.clone(),
            is_admin: payload.is_admin,
            sid: payload.session_id.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with the session key.
    ///
    /// `claims` must carry `iss`, `aud` and `exp` matching this issuer to be
    /// readable by [`decode_claims`](Self::decode_claims).
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Decode claims signed by [`sign`](Self::sign).
    pub fn decode_claims<T: DeserializeOwned>(&self, token: &str, validate_exp: bool) -> Option<T> {
        decode::<T>(token, &self.decoding, &self.validation(validate_exp))
            .ok()
            .map(|data| data.claims)
    }

    /// Verify signature, issuer, audience and expiry.
    ///
    /// Every failure (bad signature, expired, malformed) yields `None`.
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        self.decode_claims(token, true)
    }

    /// Like [`verify`](Self::verify) but accepts expired tokens.
    ///
    /// Used when revoking: an expired cookie must still map to its session row.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Option<SessionClaims> {
        self.decode_claims(token, false)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation
    }
}

/// Generate a random alphanumeric signing secret.
pub fn generate_secret(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Resolve the signing secret: env var `JWT_SECRET` → `AUTH_SECRET`.
///
/// Fails instead of falling back to a default.
pub fn resolve_jwt_secret() -> Result<String, AuthError> {
    for var in ["JWT_SECRET", "AUTH_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.trim().is_empty()
        {
            return Ok(secret);
        }
    }
    Err(AuthError::Configuration(
        "JWT_SECRET (or AUTH_SECRET) must be set to a non-empty value".into(),
    ))
}
