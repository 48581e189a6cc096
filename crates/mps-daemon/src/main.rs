//! mps-daemon entry point.
//!
//! Loads config, chooses storage, wires the shared state, spawns the
//! background tasks and starts the HTTP server. Handlers live in
//! `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mps_daemon::{catalog::RestCatalog, routes, state};
use mps_reconcile::{InMemoryLedger, InMemoryUnresolved};
use mps_runtime::InMemoryWatermarkStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const ENV_CONFIG_PATHS: &str = "MPS_CONFIG_PATHS";
const DEFAULT_CONFIG_PATH: &str = "config/defaults/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = mps_config::load_layered_yaml(&path_refs)
        .with_context(|| format!("failed to load config from {paths:?}"))?;
    let settings = loaded.settings()?;
    let secrets = mps_config::secrets::resolve_marketplace_secrets(&settings)?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let rest = Arc::new(RestCatalog::from_settings(&settings.catalog)?);
    let backends = match std::env::var(mps_db::ENV_DB_URL) {
        Ok(url) => {
            let pool = mps_db::connect(&url).await?;
            mps_db::migrate(&pool).await?;
            info!("sync state persisted in postgres");
            state::Backends {
                catalog: rest.clone(),
                links: rest,
                ledger: Arc::new(mps_db::PgEventLedger::new(pool.clone())),
                unresolved: Arc::new(mps_db::PgUnresolvedStore::new(pool.clone())),
                watermarks: Arc::new(mps_db::PgWatermarkStore::new(pool)),
            }
        }
        Err(_) => {
            warn!("{} not set; sync state is in-memory and lost on restart", mps_db::ENV_DB_URL);
            state::Backends {
                catalog: rest.clone(),
                links: rest,
                ledger: Arc::new(InMemoryLedger::new()),
                unresolved: Arc::new(InMemoryUnresolved::new()),
                watermarks: Arc::new(InMemoryWatermarkStore::new()),
            }
        }
    };

    let (app_state, overflow) =
        state::AppState::assemble(loaded.config_hash, settings, &secrets, backends, None)?;
    let shared = Arc::new(app_state);
    shared
        .engine()
        .restore_unresolved()
        .await
        .context("failed to restore parked events")?;

    overflow.spawn(Arc::clone(shared.engine()));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_report_forwarder(Arc::clone(&shared));
    Arc::clone(&shared.orchestrator).spawn_scheduler(Duration::from_secs(5));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("mps-daemon listening on http://{}", addr);

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

/// Comma-separated layer list; later files override earlier ones.
fn config_paths_from_env() -> Vec<String> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => vec![DEFAULT_CONFIG_PATH.to_string()],
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("MPS_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
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
