//! HttpOnly cookie construction over the request's cookie jar.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rollauth_core::auth::cookies::CookieStore;
use time::Duration;

/// Build an HttpOnly, `SameSite=Lax` cookie scoped to `/`.
pub fn auth_cookie(name: &str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Expired, empty cookie that clears `name` in the browser.
pub fn clear_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// [`CookieStore`] over an axum [`CookieJar`].
///
/// Writes are collected in the jar; return [`ResponseCookies::into_jar`]
/// from the handler to emit them as `Set-Cookie` headers.
#[derive(Debug, Clone)]
pub struct ResponseCookies {
    jar: CookieJar,
    secure: bool,
}

impl ResponseCookies {
    /// `secure` marks every written cookie `Secure`; set it in production.
    pub fn new(jar: CookieJar, secure: bool) -> Self {
        Self { jar, secure }
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl CookieStore for ResponseCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.jar
            .get(name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn set(&mut self, name: &str, value: String, max_age: chrono::Duration) {
        let cookie = auth_cookie(name, value, max_age.num_seconds(), self.secure);
        self.jar = self.jar.clone().add(cookie);
    }

    fn remove(&mut self, name: &str) {
        self.jar = self.jar.clone().add(clear_cookie(name, self.secure));
    }
}
