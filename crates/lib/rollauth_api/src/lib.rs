//! # rollauth_api
//!
//! HTTP API library for rollauth.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{delete, get, post};
use axum_extra::extract::CookieJar;
use rollauth_core::auth::AuthError;
use rollauth_core::auth::jwt::SessionIssuer;
use rollauth_core::auth::service::AuthService;
use rollauth_core::auth::session::SessionService;
use rollauth_core::notify::{Notifier, TracingNotifier};
use rollauth_core::oauth::ProviderRegistry;
use rollauth_core::oauth::service::OAuthService;
use rollauth_core::rate_limit::RateLimiter;
use rollauth_core::store::AuthStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ApiConfig;
use crate::handlers::{admin, auth, health, oauth, sessions};
use crate::services::cookies::ResponseCookies;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub store: Arc<dyn AuthStore>,
    pub auth: AuthService,
    pub oauth: OAuthService,
}

impl AppState {
    /// Wire the services over `store`.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn AuthStore>,
        providers: ProviderRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuthError> {
        let auth_config = Arc::new(config.auth.clone());
        let issuer = Arc::new(SessionIssuer::new(
            &auth_config.jwt_secret,
            &auth_config.jwt_issuer,
            &auth_config.jwt_audience,
        )?);
        let sessions = SessionService::new(store.clone(), issuer)
            .with_cross_check(config.cross_check_sessions);
        let auth = AuthService::new(
            auth_config.clone(),
            store.clone(),
            sessions.clone(),
            notifier.clone(),
        );
        let oauth = OAuthService::new(providers, store.clone(), sessions, notifier)
            .with_missing_email_policy(auth_config.missing_email);

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
            oauth,
        })
    }

    /// State with the providers enabled in `config` and a logging notifier.
    pub fn from_config(config: ApiConfig, store: Arc<dyn AuthStore>) -> Result<Self, AuthError> {
        let providers = ProviderRegistry::from_config(&config.auth)?;
        Self::new(config, store, providers, Arc::new(TracingNotifier))
    }

    pub fn sessions(&self) -> &SessionService {
        self.auth.sessions()
    }

    /// Limiters to hand to the sweeper.
    pub fn limiters(&self) -> Vec<Arc<RateLimiter>> {
        self.auth.limiters()
    }

    /// Cookie adapter over the request's jar, `Secure` in production.
    pub fn cookies(&self, jar: CookieJar) -> ResponseCookies {
        ResponseCookies::new(jar, self.config.auth.production)
    }
}

fn cors_layer(app_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);
    match HeaderValue::from_str(app_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            warn!(app_url, "App URL is not a valid origin; cross-origin requests disabled");
            cors
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.auth.app_url);

    let auth_routes = Router::new()
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(routes::POST_AUTH_TOKEN, post(auth::token_handler))
        .route(routes::POST_AUTH_PASSWORD, post(auth::change_password_handler));

    let session_routes = Router::new()
        .route(routes::GET_AUTH_SESSIONS, get(sessions::list_sessions_handler))
        .route(
            routes::DELETE_AUTH_SESSIONS_ID,
            delete(sessions::revoke_session_handler),
        )
        .route(
            routes::POST_AUTH_SESSIONS_REVOKE_ALL,
            post(sessions::revoke_all_handler),
        );

    let oauth_routes = Router::new()
        .route(routes::GET_AUTH_ACCOUNTS, get(oauth::linked_accounts_handler))
        .route(
            routes::OAUTH_PROVIDER,
            get(oauth::start_handler).delete(oauth::unlink_handler),
        )
        .route(routes::GET_OAUTH_CALLBACK, get(oauth::callback_handler));

    let admin_routes = Router::new()
        .route(routes::GET_ADMIN_USERS, get(admin::list_users_handler))
        .route(
            routes::GET_ADMIN_USER_ACTIVITY,
            get(admin::user_activity_handler),
        )
        .route(
            routes::POST_ADMIN_USER_STATUS,
            post(admin::user_status_handler),
        );

    Router::new()
        .route(routes::GET_API_HEALTH, get(health::health_handler))
        .merge(auth_routes)
        .merge(session_routes)
        .merge(oauth_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
