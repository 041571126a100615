//! Shared harness for the router integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, Response};
use rollauth_api::AppState;
use rollauth_api::config::ApiConfig;
use rollauth_core::config::AuthConfig;
use rollauth_core::notify::TracingNotifier;
use rollauth_core::oauth::ProviderRegistry;
use rollauth_core::store::MemoryAuthStore;
use serde_json::Value;
use tower::ServiceExt;

pub const APP_URL: &str = "http://app.test";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryAuthStore>,
}

pub fn test_config() -> ApiConfig {
    let mut auth = AuthConfig::new("integration-test-secret");
    auth.app_url = APP_URL.into();
    ApiConfig::new(auth)
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config(), ProviderRegistry::new())
}

pub fn spawn_app_with(config: ApiConfig, providers: ProviderRegistry) -> TestApp {
    let store = Arc::new(MemoryAuthStore::new());
    let state = AppState::new(config, store.clone(), providers, Arc::new(TracingNotifier))
        .expect("app state");
    TestApp {
        router: rollauth_api::router(state),
        store,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("request")
    }

    /// Register a password account; returns the response body.
    pub async fn register(&self, email: &str, username: &str, password: &str) -> Value {
        let resp = self
            .send(json_request(
                Method::POST,
                "/api/auth/register",
                serde_json::json!({
                    "email": email,
                    "username": username,
                    "firstName": "Test",
                    "lastName": "User",
                    "password": password,
                }),
                None,
            ))
            .await;
        assert_eq!(resp.status(), 201, "registration of {email} failed");
        body_json(resp).await
    }

    /// Sign in and return the `token=...` pair to send back as a cookie.
    pub async fn login(&self, login: &str, password: &str) -> String {
        let resp = self
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                serde_json::json!({ "login": login, "password": password }),
                None,
            ))
            .await;
        assert_eq!(resp.status(), 200, "login of {login} failed");
        cookie_pair(&resp, "token").expect("session cookie")
    }
}

pub fn json_request(method: Method, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: Method, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse JSON")
}

/// Full `Set-Cookie` header for `name`, if the response sets it.
pub fn set_cookie_header(resp: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(str::to_string)
}

/// `name=value` of a non-empty cookie set by the response.
pub fn cookie_pair(resp: &Response<Body>, name: &str) -> Option<String> {
    let header = set_cookie_header(resp, name)?;
    let pair = header.split(';').next()?.trim().to_string();
    if pair.len() == name.len() + 1 {
        None
    } else {
        Some(pair)
    }
}
