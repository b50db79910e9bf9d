//! Request authentication gate: bearer token -> identity -> ready tenant context.

use crate::error::AppError;
use crate::state::AppState;
use crate::tenant::{TenantBackend, TenantContext};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

/// Extractor yielding the caller's identity and their lab's entity bindings.
/// Handlers taking it only run once the lab is connected, synchronized and seeded.
pub struct Tenant<B: TenantBackend>(pub TenantContext<B::Bindings>);

#[async_trait]
impl<B: TenantBackend> FromRequestParts<AppState<B>> for Tenant<B> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<B>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v: &axum::http::HeaderValue| v.to_str().ok());
        let identity = state.tokens.identity_from_header(header)?;
        let ctx = state.tenants.admit(identity).await?;
        Ok(Tenant(ctx))
    }
}
