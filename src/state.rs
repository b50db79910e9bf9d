//! Shared application state for all routes.

use crate::auth::TokenDecoder;
use crate::registry::PgRegistryStore;
use crate::tenant::{PgTenantBackend, TenantBackend, TenantManager};
use std::sync::Arc;

pub struct AppState<B: TenantBackend = PgTenantBackend> {
    pub tenants: Arc<TenantManager<B>>,
    pub tokens: TokenDecoder,
    /// Registry handle for readiness checks; absent when the registry is not Postgres-backed.
    pub registry: Option<PgRegistryStore>,
}

impl<B: TenantBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        AppState {
            tenants: Arc::clone(&self.tenants),
            tokens: self.tokens.clone(),
            registry: self.registry.clone(),
        }
    }
}
