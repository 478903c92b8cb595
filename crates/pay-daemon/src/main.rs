//! pay-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads configuration,
//! connects storage and the provider client, and starts the HTTP server.
//! All route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pay_daemon::{routes, state};
use pay_gateway::CardServClient;
use pay_reconcile::ReconcileEngine;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = load_config()?;
    info!(
        sweep_interval_secs = cfg.sweep_interval_secs,
        "configuration loaded"
    );

    let pool = pay_db::connect_from_env().await?;
    pay_db::migrate(&pool).await?;
    let store = Arc::new(pay_db::PgStore::new(pool));

    let gateway = Arc::new(CardServClient::new(cfg.gateway.clone()));
    let engine = Arc::new(ReconcileEngine::new(
        gateway,
        store,
        cfg.currencies.clone(),
        cfg.redirect_wait.into(),
    ));

    state::spawn_sweep_tick(
        Arc::clone(&engine),
        Duration::from_secs(cfg.sweep_interval_secs),
    );

    let shared = Arc::new(state::AppState::new(engine));
    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8710)));
    info!("pay-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Load layered YAML config. `PAY_CONFIG_PATHS` is a comma-separated list of
/// paths (later paths override earlier ones); defaults to `config/pay.yaml`.
fn load_config() -> anyhow::Result<pay_config::AppConfig> {
    let joined =
        std::env::var("PAY_CONFIG_PATHS").unwrap_or_else(|_| "config/pay.yaml".to_string());
    let paths: Vec<&str> = joined.split(',').map(str::trim).collect();
    let loaded = pay_config::load_layered_yaml(&paths)?;
    info!(config_hash = %loaded.config_hash, "config layered and hashed");
    pay_config::AppConfig::from_loaded(&loaded)
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PAY_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins (the storefront dev servers).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
