//! Lab server: connects the registry, registers the default lab, and serves the gated API.
//!
//! Run from repo root: `cargo run -p lab_server`

use axum::Router;
use lab_tenancy::{
    common_routes, entity_routes, tenant_routes, telemetry, AppState, PgRegistryStore, PgTenantBackend, Settings,
    TenantManager, TokenDecoder,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("lab_tenancy=info,lab_server=info");

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(settings.pool.acquire_timeout)
        .connect(&settings.database_url)
        .await?;

    let registry = PgRegistryStore::new(pool, settings.registry_schema.clone());
    registry.ensure_registry_table().await?;
    registry.seed_default_tenant(settings.default_tenant.as_ref()).await?;

    let backend = PgTenantBackend::new(settings.default_admin_password.clone());
    let tenants = Arc::new(TenantManager::new(
        backend,
        Arc::new(registry.clone()),
        settings.pool.clone(),
    ));
    let state = AppState {
        tenants: Arc::clone(&tenants),
        tokens: TokenDecoder::new(&settings.jwt_secret),
        registry: Some(registry),
    };

    let api = Router::new()
        .merge(tenant_routes(state.clone()))
        .merge(entity_routes(state.clone()));
    let app = Router::new()
        .merge(common_routes(state))
        .nest("/api/v1", api)
        .layer(RequestBodyLimitLayer::new(settings.max_body_bytes));

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tenants.shutdown().await;
    Ok(())
}
