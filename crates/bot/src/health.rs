use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use bot_api::{CatalogEntry, TransformCatalog};
use storage::Storage;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

#[derive(Clone)]
pub struct HealthState {
    pub storage: Storage,
    pub catalog: Arc<TransformCatalog>,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/catalog", get(catalog))
        .with_state(state)
}

async fn healthz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    match state.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(error = %error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

async fn catalog(State(state): State<HealthState>) -> Json<Vec<Vec<CatalogEntry>>> {
    Json(state.catalog.rows().to_vec())
}

/// Aborts the server task when the owning run ends.
pub struct HealthServer(JoinHandle<()>);

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn serve(bind: &str, state: HealthState) -> anyhow::Result<HealthServer> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid health_bind '{bind}'"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health endpoint on {addr}"))?;
    info!(%addr, "health endpoint listening");
    let app = build_router(state);
    Ok(HealthServer(tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            warn!(error = %error, "health endpoint stopped");
        }
    })))
}

#[cfg(test)]
#[path = "tests/health_tests.rs"]
mod tests;
