//! In-memory registry and backend for exercising the tenant manager without a database.

use super::backend::TenantBackend;
use super::connection::TenantHandle;
use crate::auth::Identity;
use crate::entity::BindError;
use crate::error::TenantError;
use crate::registry::{RegistryStore, TenantCredential};
use crate::settings::PoolSettings;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn credential(lab_code: &str, host: &str, database: &str) -> TenantCredential {
    TenantCredential {
        lab_code: lab_code.into(),
        database_host: host.into(),
        database_name: database.into(),
        database_user: "lab".into(),
        database_secret: "secret".into(),
    }
}

pub(crate) fn identity(lab_code: &str) -> Identity {
    Identity {
        user_id: "u-1".into(),
        email: "tech@example.com".into(),
        display_name: "Lab Tech".into(),
        lab_code: lab_code.into(),
    }
}

#[derive(Default)]
pub(crate) struct MemoryRegistry {
    rows: Mutex<HashMap<String, TenantCredential>>,
    pub lookups: AtomicUsize,
    pub unavailable: AtomicBool,
}

impl MemoryRegistry {
    pub fn with(rows: &[TenantCredential]) -> Self {
        let registry = MemoryRegistry::default();
        {
            let mut map = registry.rows.lock().unwrap();
            for row in rows {
                map.insert(row.lab_code.clone(), row.clone());
            }
        }
        registry
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn find_credential(&self, lab_code: &str) -> Result<Option<TenantCredential>, TenantError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenantError::Registry(sqlx::Error::PoolTimedOut));
        }
        Ok(self.rows.lock().unwrap().get(lab_code).cloned())
    }
}

pub(crate) struct MemoryHandle {
    pub database_name: String,
    pub alive: AtomicBool,
    pub closed: AtomicBool,
    closed_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl TenantHandle for MemoryHandle {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn probe(&self) -> Result<(), sqlx::Error> {
        if self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(sqlx::Error::PoolClosed)
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub(crate) struct MemoryBindings {
    pub database_name: String,
}

/// Fake lab backend. Failures are keyed by database name.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    pub unreachable_hosts: Mutex<HashSet<String>>,
    pub fail_sync: Mutex<HashSet<String>>,
    pub fail_seed: Mutex<HashSet<String>>,
    pub sync_delay: Duration,
    pub connects: AtomicUsize,
    pub binds: AtomicUsize,
    pub syncs: AtomicUsize,
    pub seeds: AtomicUsize,
    pub admins: Mutex<HashSet<String>>,
    pub closed: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn has_admin(&self, database: &str) -> bool {
        self.admins.lock().unwrap().contains(database)
    }

    pub fn closed_handles(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantBackend for MemoryBackend {
    type Handle = MemoryHandle;
    type Bindings = MemoryBindings;

    async fn connect(&self, credential: &TenantCredential, _settings: &PoolSettings) -> Result<MemoryHandle, sqlx::Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let reachable = !self.unreachable_hosts.lock().unwrap().contains(&credential.database_host);
        Ok(MemoryHandle {
            database_name: credential.database_name.clone(),
            alive: AtomicBool::new(reachable),
            closed: AtomicBool::new(false),
            closed_counter: Arc::clone(&self.closed),
        })
    }

    fn bind_entities(&self, handle: &MemoryHandle) -> Result<MemoryBindings, BindError> {
        if handle.closed.load(Ordering::SeqCst) {
            return Err(BindError::PoolClosed);
        }
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryBindings {
            database_name: handle.database_name.clone(),
        })
    }

    async fn synchronize_schema(&self, handle: &MemoryHandle) -> Result<(), sqlx::Error> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if !self.sync_delay.is_zero() {
            tokio::time::sleep(self.sync_delay).await;
        }
        if self.fail_sync.lock().unwrap().contains(&handle.database_name) {
            return Err(sqlx::Error::Protocol("relation already exists".into()));
        }
        Ok(())
    }

    async fn seed_defaults(&self, bindings: &MemoryBindings, _lab_code: &str) -> Result<(), sqlx::Error> {
        self.seeds.fetch_add(1, Ordering::SeqCst);
        if self.fail_seed.lock().unwrap().contains(&bindings.database_name) {
            return Err(sqlx::Error::Protocol("insert failed".into()));
        }
        self.admins.lock().unwrap().insert(bindings.database_name.clone());
        Ok(())
    }
}
