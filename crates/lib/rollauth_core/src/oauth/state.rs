//! CSRF state for in-flight OAuth flows.
//!
//! The nonce travels to the provider in the `state` query parameter. The
//! cookie holds the same nonce inside a token signed with the session key,
//! together with the provider, its expiry and the id of the user who started
//! the flow (when signed in), so none of them can be altered client-side.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::auth::AuthError;
use crate::auth::jwt::SessionIssuer;

/// Lifetime of a pending flow (10 minutes).
pub const STATE_TTL: Duration = Duration::minutes(10);

const STATE_TYPE: &str = "oauth_state";

/// Claims stored in the state cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateClaims {
    pub typ: String,
    pub nonce: String,
    /// Provider the flow was started for.
    pub provider: String,
    /// User signed in when the flow started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
}

/// Result of comparing the callback's `state` with the cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateCheck {
    Valid(OAuthStateClaims),
    /// No cookie, or one that fails signature checks.
    Missing,
    /// Cookie present but for a different flow or provider.
    Mismatch,
    Expired,
}

/// Generate a cryptographic state nonce (24 random bytes, URL-safe).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Start a flow: returns `(nonce, cookie_value)`.
pub fn seal(
    issuer: &SessionIssuer,
    provider_id: &str,
    user_id: Option<&str>,
) -> Result<(String, String), AuthError> {
    let nonce = generate_nonce();
    let claims = OAuthStateClaims {
        typ: STATE_TYPE.into(),
        nonce: nonce.clone(),
        provider: provider_id.to_string(),
        uid: user_id.map(str::to_string),
        iss: issuer.issuer().to_string(),
        aud: issuer.audience().to_string(),
        exp: (Utc::now() + STATE_TTL).timestamp(),
    };
    let cookie = issuer.sign(&claims)?;
    Ok((nonce, cookie))
}

/// Compare the presented `state` and the callback's provider against the
/// cookie value.
pub fn check(
    issuer: &SessionIssuer,
    cookie: Option<&str>,
    presented: &str,
    provider_id: &str,
) -> StateCheck {
    check_at(issuer, cookie, presented, provider_id, Utc::now().timestamp())
}

fn check_at(
    issuer: &SessionIssuer,
    cookie: Option<&str>,
    presented: &str,
    provider_id: &str,
    now: i64,
) -> StateCheck {
    let Some(claims) = cookie
        .filter(|c| !c.is_empty())
        .and_then(|c| issuer.decode_claims::<OAuthStateClaims>(c, false))
        .filter(|c| c.typ == STATE_TYPE)
    else {
        return StateCheck::Missing;
    };
    let nonce_matches: bool = claims.nonce.as_bytes().ct_eq(presented.as_bytes()).into();
    if presented.is_empty() || !nonce_matches || claims.provider != provider_id {
        return StateCheck::Mismatch;
    }
    if now >= claims.exp {
        return StateCheck::Expired;
    }
    StateCheck::Valid(claims)
}
