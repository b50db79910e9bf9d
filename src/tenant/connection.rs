//! Per-lab connection pools.

use crate::registry::TenantCredential;
use crate::settings::PoolSettings;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

/// A live connection to one lab database, as held by the connection cache.
#[async_trait]
pub trait TenantHandle: Send + Sync + 'static {
    /// Database this handle was opened against.
    fn database_name(&self) -> &str;

    /// Cheap round trip proving the handle can still serve queries.
    async fn probe(&self) -> Result<(), sqlx::Error>;

    async fn close(&self);
}

/// Bounded pool to a single lab database.
#[derive(Clone, Debug)]
pub struct TenantPool {
    pool: PgPool,
    database_name: String,
}

impl TenantPool {
    /// Open a pool for `credential`. The pool itself establishes no connection;
    /// callers probe it before handing it out.
    pub fn open(credential: &TenantCredential, settings: &PoolSettings) -> Self {
        let (host, port) = credential.host_and_port();
        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&credential.database_user)
            .password(&credential.database_secret)
            .database(&credential.database_name)
            .application_name("lab-tenancy");
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Some(settings.idle_timeout))
            .connect_lazy_with(options);
        TenantPool {
            pool,
            database_name: credential.database_name.clone(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantHandle for TenantPool {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn probe(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
