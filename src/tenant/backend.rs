//! The per-lab operations the tenant manager orchestrates: connect, bind, sync, seed.

use super::connection::{TenantHandle, TenantPool};
use crate::entity::{bind_entities, BindError, EntityBindingSet};
use crate::registry::TenantCredential;
use crate::schema::{self, LabSchema};
use crate::seed;
use crate::settings::PoolSettings;
use async_trait::async_trait;

/// Everything the manager needs from a lab database backend.
///
/// `bind_entities` must be a pure function of the handle: the manager calls it on every
/// request and never caches the result.
#[async_trait]
pub trait TenantBackend: Send + Sync + 'static {
    type Handle: TenantHandle;
    type Bindings: Send + Sync + 'static;

    /// Build a new (unprobed) handle for `credential`.
    async fn connect(&self, credential: &TenantCredential, settings: &PoolSettings)
        -> Result<Self::Handle, sqlx::Error>;

    fn bind_entities(&self, handle: &Self::Handle) -> Result<Self::Bindings, BindError>;

    async fn synchronize_schema(&self, handle: &Self::Handle) -> Result<(), sqlx::Error>;

    async fn seed_defaults(&self, bindings: &Self::Bindings, lab_code: &str) -> Result<(), sqlx::Error>;
}

/// PostgreSQL backend: one [`TenantPool`] per lab, bindings over the lab schema.
#[derive(Clone, Debug)]
pub struct PgTenantBackend {
    schema: &'static LabSchema,
    admin_password: String,
}

impl PgTenantBackend {
    pub fn new(admin_password: impl Into<String>) -> Self {
        PgTenantBackend {
            schema: schema::lab_schema(),
            admin_password: admin_password.into(),
        }
    }
}

#[async_trait]
impl TenantBackend for PgTenantBackend {
    type Handle = TenantPool;
    type Bindings = EntityBindingSet;

    async fn connect(&self, credential: &TenantCredential, settings: &PoolSettings) -> Result<TenantPool, sqlx::Error> {
        Ok(TenantPool::open(credential, settings))
    }

    fn bind_entities(&self, handle: &TenantPool) -> Result<EntityBindingSet, BindError> {
        bind_entities(handle.pool(), self.schema)
    }

    async fn synchronize_schema(&self, handle: &TenantPool) -> Result<(), sqlx::Error> {
        schema::synchronize_schema(handle.pool(), self.schema).await
    }

    async fn seed_defaults(&self, bindings: &EntityBindingSet, lab_code: &str) -> Result<(), sqlx::Error> {
        let report = seed::seed_defaults(bindings, lab_code, &self.admin_password).await?;
        if report.changed_anything() {
            tracing::info!(lab_code = %lab_code, ?report, "seeded lab defaults");
        } else {
            tracing::debug!(lab_code = %lab_code, "lab defaults already present");
        }
        Ok(())
    }
}
