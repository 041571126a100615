//! Cookie jar capability used by the login and OAuth flows.
//!
//! The flows only need get/set/remove by name; attribute policy (HttpOnly,
//! Secure, SameSite, path) belongs to the implementor. The HTTP layer
//! implements this over the request's cookie jar.

use std::collections::HashMap;

use chrono::Duration;

/// Cookie carrying the signed session token.
pub const SESSION_COOKIE: &str = "token";

/// Cookie carrying the CSRF nonce of an in-flight OAuth flow.
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Read/write access to the cookies of one request/response pair.
pub trait CookieStore: Send + Sync {
    /// Current value, or `None` when absent or cleared.
    fn get(&self, name: &str) -> Option<String>;

    /// Set a cookie that expires after `max_age`.
    fn set(&mut self, name: &str, value: String, max_age: Duration);

    /// Clear a cookie.
    fn remove(&mut self, name: &str);
}

/// In-memory cookie jar for non-HTTP callers and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCookies {
    values: HashMap<String, (String, Duration)>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Max-Age of a set cookie.
    pub fn max_age(&self, name: &str) -> Option<Duration> {
        self.values.get(name).map(|(_, age)| *age)
    }
}

impl CookieStore for MemoryCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|(v, _)| v.clone())
    }

    fn set(&mut self, name: &str, value: String, max_age: Duration) {
        self.values.insert(name.to_string(), (value, max_age));
    }

    fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}
