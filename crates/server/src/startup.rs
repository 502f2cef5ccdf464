use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use common::utils::logging::init_logging_from_env;
use configs::AppConfig;
use dotenvy::dotenv;
use service::resources::{ResourceProcessor, ResourceRepository, ResourceService};
use service::state_store::{bootstrap_database, connect_to_db};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::errors::StartupError;
use crate::routes;
use crate::state::ServerState;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("bind address: {e}")))
}

/// Connect the state store, bootstrap its database and wire up the
/// resource service.
///
/// An unreachable store is logged and tolerated; operations are still
/// accepted and processed in memory.
pub async fn build_state(cfg: &AppConfig) -> ServerState {
    let state_store = connect_to_db(&cfg.state_store).await;
    if state_store.is_none() && cfg.state_store.is_configured() {
        warn!(endpoint = %cfg.state_store.endpoint, "state store unavailable, continuing without it");
    }
    if let Err(e) = bootstrap_database(state_store.as_ref(), &cfg.state_store.database).await {
        warn!(error = %e, database = %cfg.state_store.database, "database bootstrap failed");
    }

    let repo = Arc::new(ResourceRepository::new());
    let processor = ResourceProcessor::new(Arc::clone(&repo), &cfg.processor);
    ServerState {
        resources: ResourceService::new(repo, processor),
        auth: Arc::new(cfg.auth.clone()),
        state_store,
    }
}

pub fn build_app(state: ServerState) -> Router {
    routes::build_router(state, build_cors())
}

/// Public entry: load config, build the app and serve until Ctrl+C.
pub async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    init_logging_from_env();

    let cfg = AppConfig::load_or_env()?;
    let state = build_state(&cfg).await;
    let processor = state.resources.processor().clone();
    let app = build_app(state);

    let addr = bind_addr(&cfg)?;
    info!(%addr, workers = cfg.processor.max_workers, "starting resource api");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    processor.shutdown();
    if !processor.drain(SHUTDOWN_DRAIN).await {
        warn!(limit_secs = SHUTDOWN_DRAIN.as_secs(), "queued operations still running at shutdown");
    }
    info!("resource api stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::state_store::DocumentDbClient;

    #[test]
    fn bind_addr_rejects_bad_host() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "not a host".into();
        assert!(matches!(bind_addr(&cfg), Err(StartupError::InvalidConfig(_))));
        cfg.server.host = "127.0.0.1".into();
        assert_eq!(bind_addr(&cfg).unwrap().port(), cfg.server.port);
    }

    #[tokio::test]
    async fn state_builds_with_memory_store() {
        let mut cfg = AppConfig::default();
        cfg.state_store.endpoint = "memory://test".into();
        let state = build_state(&cfg).await;
        let store = state.state_store.expect("memory store");
        assert!(store.database_exists(&cfg.state_store.database).await.unwrap());
    }

    #[tokio::test]
    async fn state_builds_without_store() {
        let state = build_state(&AppConfig::default()).await;
        assert!(state.state_store.is_none());
    }
}
