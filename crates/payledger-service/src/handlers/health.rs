//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::StoreBackend;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Storage engine in use.
    pub store: &'static str,
    /// Which payment rails have a gateway behind them.
    pub rails: Rails,
}

/// Gateway availability per rail.
#[derive(Debug, Serialize)]
pub struct Rails {
    /// Card gateway configured.
    pub card: bool,
    /// Token gateway configured.
    pub token: bool,
}

/// Liveness probe. Unconfigured rails do not make the service unhealthy.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.config.store_backend {
        StoreBackend::Memory => "memory",
        StoreBackend::Rocks => "rocksdb",
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store,
        rails: Rails {
            card: state.config.card_gateway.is_some(),
            token: state.config.token_gateway.is_some(),
        },
    })
}
