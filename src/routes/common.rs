//! Common routes: health, readiness, version.

use crate::state::AppState;
use crate::tenant::TenantBackend;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    registry: &'static str,
    cached_labs: usize,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready<B: TenantBackend>(State(state): State<AppState<B>>) -> (StatusCode, Json<ReadyBody>) {
    let cached_labs = state.tenants.cached_lab_codes().len();
    let registry_ok = match &state.registry {
        Some(registry) => registry.ping().await.is_ok(),
        None => true,
    };
    if registry_ok {
        (
            StatusCode::OK,
            Json(ReadyBody {
                status: "ok",
                registry: "ok",
                cached_labs,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                registry: "unavailable",
                cached_labs,
            }),
        )
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /ready, GET /version.
pub fn common_routes<B: TenantBackend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<B>))
        .route("/version", get(version))
        .with_state(state)
}
