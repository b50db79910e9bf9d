//! Tenant-scoped handlers. Each takes the [`Tenant`] extractor, so by the time the body runs
//! the lab connection is live and its schema and defaults are in place.

use crate::error::AppError;
use crate::extractors::tenant::Tenant;
use crate::response::{success_many, success_one_ok};
use crate::tenant::{PgTenantBackend, TenantBackend};
use axum::extract::{Path, Query};
use serde_json::{json, Value};
use std::collections::HashMap;

/// GET /api/v1/me: the authenticated caller and their lab.
pub async fn me<B: TenantBackend>(Tenant(ctx): Tenant<B>) -> impl axum::response::IntoResponse {
    success_one_ok(json!({
        "labCode": ctx.lab_code(),
        "user": ctx.identity,
    }))
}

fn parse_list_params(params: HashMap<String, String>) -> (Vec<(String, Value)>, Option<u32>, Option<u32>) {
    let mut limit = None;
    let mut offset = None;
    let mut filters = Vec::new();
    for (k, v) in params {
        match k.as_str() {
            "limit" => limit = v.parse().ok(),
            "offset" => offset = v.parse().ok(),
            "include" => {}
            _ => filters.push((k, Value::String(v))),
        }
    }
    filters.sort_by(|a, b| a.0.cmp(&b.0));
    (filters, limit, offset)
}

/// GET /api/v1/entities/:name: list rows of one lab entity with exact-match filters.
pub async fn list_entity(
    Tenant(ctx): Tenant<PgTenantBackend>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let binding = ctx.bindings.get(&name).ok_or_else(|| AppError::NotFound(name.clone()))?;
    let (filters, limit, offset) = parse_list_params(params);
    binding.check_filters(&filters).map_err(AppError::BadRequest)?;
    let rows = binding.list(&filters, limit, offset).await?;
    Ok(success_many(rows))
}

/// GET /api/v1/entities/:name/:id?include=a,b: one row with related rows embedded.
pub async fn read_entity(
    Tenant(ctx): Tenant<PgTenantBackend>,
    Path((name, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let binding = ctx.bindings.get(&name).ok_or_else(|| AppError::NotFound(name.clone()))?;
    if binding.table().primary_key == "id" && uuid::Uuid::parse_str(&id).is_err() {
        return Err(AppError::BadRequest("invalid uuid".into()));
    }
    let includes: Vec<&str> = params
        .get("include")
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let row = binding
        .find_with(&Value::String(id.clone()), &includes)
        .await?
        .ok_or_else(|| AppError::NotFound(id))?;
    Ok(success_one_ok(row))
}
