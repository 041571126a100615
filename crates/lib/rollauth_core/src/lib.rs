//! # rollauth_core
//!
//! Core authentication logic for rollauth: password hashing, signed session
//! tokens, credential/session stores, rate limiting and OAuth sign-in.

pub mod auth;
pub mod config;
pub mod models;
pub mod notify;
pub mod oauth;
pub mod rate_limit;
pub mod store;
pub mod sweeper;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
