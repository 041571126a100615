//! rollauth HTTP server binary.
//!
//! Connects to PostgreSQL, applies the auth migrations and serves the API
//! until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use rollauth_api::AppState;
use rollauth_api::config::ApiConfig;
use rollauth_core::store::PgAuthStore;
use rollauth_core::sweeper::{SWEEP_INTERVAL, spawn_sweeper};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,rollauth_api=debug,rollauth_core=debug";

/// CLI arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "rollauth_server", about = "rollauth authentication server")]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 3100)]
    port: u16,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/rollauth"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,
}

async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    // Fails fast on a missing signing secret.
    let mut config = ApiConfig::from_env()?;
    config.bind_addr = format!("{}:{}", args.host, args.port);
    config.pg_connection_url = args.database_url;

    info!(
        bind_addr = %config.bind_addr,
        max_connections = args.max_connections,
        production = config.auth.production,
        "starting rollauth_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    let store = Arc::new(PgAuthStore::new(pool));
    info!("running database migrations");
    store.migrate().await?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState::from_config(config, store.clone())?;
    info!(providers = ?state.oauth.providers().ids(), "OAuth providers enabled");

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(store, state.limiters(), SWEEP_INTERVAL, cancel.clone());

    let app = rollauth_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await;

    cancel.cancel();
    let _ = sweeper.await;
    result?;

    Ok(())
}
