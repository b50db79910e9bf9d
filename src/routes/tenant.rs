//! Tenant-scoped routes; every handler here sits behind the authentication gate.

use crate::handlers::{list_entity, me, read_entity};
use crate::state::AppState;
use crate::tenant::{PgTenantBackend, TenantBackend};
use axum::{routing::get, Router};

/// GET /me. Works with any backend.
pub fn tenant_routes<B: TenantBackend>(state: AppState<B>) -> Router {
    Router::new().route("/me", get(me::<B>)).with_state(state)
}

/// GET /entities/:name and /entities/:name/:id over the lab's entity bindings.
pub fn entity_routes(state: AppState<PgTenantBackend>) -> Router {
    Router::new()
        .route("/entities/:name", get(list_entity))
        .route("/entities/:name/:id", get(read_entity))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{claims_for, mint_token, TokenDecoder};
    use crate::tenant::testing::{credential, MemoryBackend, MemoryRegistry};
    use crate::tenant::TenantManager;
    use crate::settings::PoolSettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "gate-secret";

    fn app(registry: MemoryRegistry, backend: MemoryBackend) -> (Router, AppState<MemoryBackend>, Arc<MemoryRegistry>) {
        let registry = Arc::new(registry);
        let state = AppState {
            tenants: Arc::new(TenantManager::new(backend, registry.clone(), PoolSettings::default())),
            tokens: TokenDecoder::new(SECRET),
            registry: None,
        };
        (Router::new().nest("/api/v1", tenant_routes(state.clone())), state, registry)
    }

    fn me_request(token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri("/api/v1/me");
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn new_lab_first_request_succeeds_and_seeds_admin() {
        let (router, state, _) = app(
            MemoryRegistry::with(&[credential("ACME01", "db", "acme")]),
            MemoryBackend::default(),
        );
        let token = mint_token(SECRET, &claims_for(Some("ACME01")));
        let res = router.oneshot(me_request(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["data"]["labCode"], "ACME01");
        assert_eq!(body["data"]["user"]["email"], "tech@example.com");
        assert!(state.tenants.backend().has_admin("acme"));
    }

    #[tokio::test]
    async fn initialized_lab_skips_sync_and_seed() {
        let (router, state, _) = app(
            MemoryRegistry::with(&[credential("ACME01", "db", "acme")]),
            MemoryBackend::default(),
        );
        let token = mint_token(SECRET, &claims_for(Some("ACME01")));
        for _ in 0..2 {
            let res = router.clone().oneshot(me_request(Some(&token))).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let backend = state.tenants.backend();
        assert_eq!(backend.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(backend.seeds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_lab_returns_503_and_is_not_cached() {
        let backend = MemoryBackend::default();
        backend.unreachable_hosts.lock().unwrap().insert("down.example".into());
        let (router, state, _) = app(
            MemoryRegistry::with(&[credential("BAD01", "down.example", "bad")]),
            backend,
        );
        let token = mint_token(SECRET, &claims_for(Some("BAD01")));
        let res = router.oneshot(me_request(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "lab_unavailable");
        assert!(body["error"]["message"].as_str().unwrap().contains("BAD01"));
        assert!(!state.tenants.is_cached("BAD01"));
    }

    #[tokio::test]
    async fn missing_lab_code_is_401_without_registry_lookup() {
        let (router, _, registry) = app(MemoryRegistry::default(), MemoryBackend::default());
        let token = mint_token(SECRET, &claims_for(None));
        let res = router.oneshot(me_request(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_lab_and_missing_token_are_401() {
        let (router, state, _) = app(MemoryRegistry::default(), MemoryBackend::default());
        let token = mint_token(SECRET, &claims_for(Some("GHOST1")));
        let res = router.clone().oneshot(me_request(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = router.oneshot(me_request(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.tenants.backend().connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_sync_returns_503_and_clears_cache() {
        let backend = MemoryBackend::default();
        backend.fail_sync.lock().unwrap().insert("acme".into());
        let (router, state, _) = app(
            MemoryRegistry::with(&[credential("ACME01", "db", "acme")]),
            backend,
        );
        let token = mint_token(SECRET, &claims_for(Some("ACME01")));
        let res = router.oneshot(me_request(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!state.tenants.is_cached("ACME01"));
        assert!(!state.tenants.is_initialized("ACME01"));
    }
}
