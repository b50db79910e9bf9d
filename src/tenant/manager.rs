//! Connection cache and initialization record for every lab served by this process.
//!
//! Both collections sit behind one mutex that is never held across an await. Slow work
//! (probing, connecting, schema sync, seeding) is serialized per lab code by async gates,
//! so two first requests for the same lab never both run setup.

use super::backend::TenantBackend;
use super::connection::TenantHandle;
use crate::auth::Identity;
use crate::error::TenantError;
use crate::registry::{RegistryStore, TenantCredential};
use crate::settings::PoolSettings;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Setup progress of one lab within this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Unknown,
    Initializing,
    Ready,
}

/// Request-scoped result of a successful admission: who is calling and their lab's bindings.
#[derive(Clone, Debug)]
pub struct TenantContext<T> {
    pub identity: Identity,
    pub bindings: T,
}

impl<T> TenantContext<T> {
    pub fn lab_code(&self) -> &str {
        &self.identity.lab_code
    }
}

type Gate = Arc<AsyncMutex<()>>;

/// Init gate; holds the error text of the last failed setup attempt for the lab.
type InitGate = Arc<AsyncMutex<Option<String>>>;

struct CacheState<H> {
    connections: HashMap<String, Arc<H>>,
    initialized: HashSet<String>,
    connect_gates: HashMap<String, Gate>,
    init_gates: HashMap<String, InitGate>,
}

/// Drop the gate for `lab_code` unless someone is holding or waiting on it.
fn prune_gate<T>(gates: &mut HashMap<String, Arc<T>>, lab_code: &str) {
    if gates.get(lab_code).is_some_and(|g| Arc::strong_count(g) == 1) {
        gates.remove(lab_code);
    }
}

struct Shared<H> {
    state: Mutex<CacheState<H>>,
}

impl<H: TenantHandle> Shared<H> {
    fn lock(&self) -> MutexGuard<'_, CacheState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, lab_code: &str) -> Option<Arc<H>> {
        self.lock().connections.get(lab_code).cloned()
    }

    /// Remove the cache entry only if it still holds `handle`; a newer handle is left alone.
    fn remove_if_same(&self, lab_code: &str, handle: &Arc<H>) -> bool {
        let mut state = self.lock();
        match state.connections.get(lab_code) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                state.connections.remove(lab_code);
                true
            }
            _ => false,
        }
    }

    fn is_current(&self, lab_code: &str, handle: &Arc<H>) -> bool {
        self.lock()
            .connections
            .get(lab_code)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    fn is_initialized(&self, lab_code: &str) -> bool {
        self.lock().initialized.contains(lab_code)
    }

    fn connect_gate(&self, lab_code: &str) -> Gate {
        self.lock().connect_gates.entry(lab_code.to_string()).or_default().clone()
    }

    fn init_gate(&self, lab_code: &str) -> InitGate {
        self.lock().init_gates.entry(lab_code.to_string()).or_default().clone()
    }
}

pub struct TenantManager<B: TenantBackend> {
    backend: Arc<B>,
    registry: Arc<dyn RegistryStore>,
    pool_settings: PoolSettings,
    shared: Arc<Shared<B::Handle>>,
}

impl<B: TenantBackend> TenantManager<B> {
    pub fn new(backend: B, registry: Arc<dyn RegistryStore>, pool_settings: PoolSettings) -> Self {
        TenantManager {
            backend: Arc::new(backend),
            registry,
            pool_settings,
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    connections: HashMap::new(),
                    initialized: HashSet::new(),
                    connect_gates: HashMap::new(),
                    init_gates: HashMap::new(),
                }),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve an authenticated identity into a ready tenant context.
    ///
    /// Steps run strictly in order: registry lookup, connection, binding, then schema sync and
    /// seeding when the lab is not yet initialized in this process.
    pub async fn admit(&self, identity: Identity) -> Result<TenantContext<B::Bindings>, TenantError> {
        let lab_code = identity.lab_code.clone();
        let credential = self
            .registry
            .find_credential(&lab_code)
            .await?
            .ok_or_else(|| TenantError::UnknownTenant(lab_code.clone()))?;
        let handle = self.resolve_connection(&lab_code, &credential).await?;
        let bindings = self.bind(&lab_code, &handle)?;
        self.ensure_initialized(&lab_code, &handle).await?;
        Ok(TenantContext { identity, bindings })
    }

    /// Return a live handle for `lab_code`, reusing the cached one when it targets the right
    /// database and passes a probe, otherwise replacing it. A new handle is cached only after
    /// its first probe succeeds.
    pub async fn resolve_connection(
        &self,
        lab_code: &str,
        credential: &TenantCredential,
    ) -> Result<Arc<B::Handle>, TenantError> {
        let gate = self.shared.connect_gate(lab_code);
        let _guard = gate.lock().await;

        if let Some(existing) = self.shared.cached(lab_code) {
            if existing.database_name() != credential.database_name {
                tracing::warn!(
                    lab_code = %lab_code,
                    cached = %existing.database_name(),
                    expected = %credential.database_name,
                    "cached connection targets the wrong database, replacing"
                );
                self.discard(lab_code, &existing).await;
            } else {
                match existing.probe().await {
                    Ok(()) => {
                        tracing::debug!(lab_code = %lab_code, "reusing cached connection");
                        return Ok(existing);
                    }
                    Err(e) => {
                        tracing::warn!(lab_code = %lab_code, error = %e, "cached connection failed probe, replacing");
                        self.discard(lab_code, &existing).await;
                    }
                }
            }
        }

        let connection_error = |source| TenantError::Connection {
            lab_code: lab_code.to_string(),
            source,
        };
        let handle = self
            .backend
            .connect(credential, &self.pool_settings)
            .await
            .map_err(connection_error)?;
        if let Err(e) = handle.probe().await {
            handle.close().await;
            return Err(connection_error(e));
        }
        let handle = Arc::new(handle);
        self.shared
            .lock()
            .connections
            .insert(lab_code.to_string(), Arc::clone(&handle));
        tracing::info!(lab_code = %lab_code, database = %credential.database_name, "opened lab connection");
        Ok(handle)
    }

    /// Bind entities to `handle`. Called on every request; the result is never cached.
    pub fn bind(&self, lab_code: &str, handle: &B::Handle) -> Result<B::Bindings, TenantError> {
        self.backend.bind_entities(handle).map_err(|e| TenantError::Binding {
            lab_code: lab_code.to_string(),
            message: e.to_string(),
        })
    }

    /// Run schema sync then seeding once per lab per process. Concurrent callers for the same lab
    /// wait for the in-flight attempt and share its outcome. The attempt runs on its own task, so
    /// it completes even when the request that started it is dropped. Failure evicts `handle` and
    /// leaves the lab uninitialized so the next request retries from a fresh connection.
    pub async fn ensure_initialized(&self, lab_code: &str, handle: &Arc<B::Handle>) -> Result<(), TenantError> {
        if self.shared.is_initialized(lab_code) {
            return Ok(());
        }
        let guard = self.shared.init_gate(lab_code).lock_owned().await;
        if self.shared.is_initialized(lab_code) {
            return Ok(());
        }
        // Our handle was evicted while we waited: the attempt we waited on failed with it.
        if !self.shared.is_current(lab_code, handle) {
            let message = (*guard)
                .clone()
                .unwrap_or_else(|| "lab connection was replaced during setup".to_string());
            tracing::debug!(lab_code = %lab_code, "setup attempt we waited on failed");
            return Err(TenantError::SetupFailed {
                lab_code: lab_code.to_string(),
                message,
            });
        }

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        let lab = lab_code.to_string();
        let handle = Arc::clone(handle);
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let result = initialize(backend.as_ref(), &lab, &handle).await;
            match &result {
                Ok(()) => {
                    *guard = None;
                    shared.lock().initialized.insert(lab.clone());
                    tracing::info!(lab_code = %lab, "lab initialized");
                }
                Err(e) => {
                    *guard = Some(e.to_string());
                    tracing::warn!(lab_code = %lab, error = %e, "lab setup failed, evicting connection");
                    if shared.remove_if_same(&lab, &handle) {
                        handle.close().await;
                    }
                }
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(join) => {
                tracing::error!(lab_code = %lab_code, error = %join, "lab setup task aborted");
                self.evict(lab_code).await;
                Err(TenantError::Sync {
                    lab_code: lab_code.to_string(),
                    source: sqlx::Error::WorkerCrashed,
                })
            }
        }
    }

    async fn discard(&self, lab_code: &str, handle: &Arc<B::Handle>) {
        self.shared.remove_if_same(lab_code, handle);
        handle.close().await;
    }

    /// Close and forget the cached connection for `lab_code` and clear its initialized mark.
    /// Gates nobody is holding are dropped too.
    pub async fn evict(&self, lab_code: &str) {
        let removed = {
            let mut state = self.shared.lock();
            state.initialized.remove(lab_code);
            prune_gate(&mut state.connect_gates, lab_code);
            prune_gate(&mut state.init_gates, lab_code);
            state.connections.remove(lab_code)
        };
        if let Some(handle) = removed {
            tracing::info!(lab_code = %lab_code, "evicted lab connection");
            handle.close().await;
        }
    }

    pub fn init_state(&self, lab_code: &str) -> InitState {
        let state = self.shared.lock();
        if state.initialized.contains(lab_code) {
            return InitState::Ready;
        }
        match state.init_gates.get(lab_code) {
            Some(gate) if gate.try_lock().is_err() => InitState::Initializing,
            _ => InitState::Unknown,
        }
    }

    pub fn is_initialized(&self, lab_code: &str) -> bool {
        self.shared.is_initialized(lab_code)
    }

    pub fn is_cached(&self, lab_code: &str) -> bool {
        self.shared.cached(lab_code).is_some()
    }

    pub fn cached_lab_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.shared.lock().connections.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Close every cached connection. The initialization record is kept.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, Arc<B::Handle>)> = self.shared.lock().connections.drain().collect();
        for (lab_code, handle) in handles {
            tracing::debug!(lab_code = %lab_code, "closing lab connection");
            handle.close().await;
        }
    }
}

async fn initialize<B: TenantBackend>(backend: &B, lab_code: &str, handle: &B::Handle) -> Result<(), TenantError> {
    tracing::info!(lab_code = %lab_code, "synchronizing lab schema");
    backend
        .synchronize_schema(handle)
        .await
        .map_err(|source| TenantError::Sync {
            lab_code: lab_code.to_string(),
            source,
        })?;
    let bindings = backend.bind_entities(handle).map_err(|e| TenantError::Binding {
        lab_code: lab_code.to_string(),
        message: e.to_string(),
    })?;
    backend
        .seed_defaults(&bindings, lab_code)
        .await
        .map_err(|source| TenantError::Seed {
            lab_code: lab_code.to_string(),
            source,
        })
}
