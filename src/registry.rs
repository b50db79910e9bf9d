//! Registry store: one row per lab mapping its lab code to database credentials.

use crate::error::TenantError;
use crate::settings::DefaultTenant;
use async_trait::async_trait;
use sqlx::PgPool;

/// Registry table name (schema-qualified at query time).
pub const REGISTRY_TABLE: &str = "lab_registry";

const DEFAULT_PORT: u16 = 5432;

/// Connection credentials of one lab database.
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TenantCredential {
    pub lab_code: String,
    pub database_host: String,
    pub database_name: String,
    pub database_user: String,
    pub database_secret: String,
}

impl std::fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredential")
            .field("lab_code", &self.lab_code)
            .field("database_host", &self.database_host)
            .field("database_name", &self.database_name)
            .field("database_user", &self.database_user)
            .field("database_secret", &"***")
            .finish()
    }
}

impl TenantCredential {
    /// Host and port parsed from `database_host`: `host`, `host:port`, `[v6addr]` or
    /// `[v6addr]:port`. A bare IPv6 address is taken as host only. Default port 5432.
    pub fn host_and_port(&self) -> (&str, u16) {
        let raw = self.database_host.as_str();
        if let Some((addr, tail)) = raw.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (addr, port.unwrap_or(DEFAULT_PORT));
        }
        match raw.split_once(':') {
            Some((host, port)) if !port.contains(':') => match port.parse() {
                Ok(port) => (host, port),
                Err(_) => (raw, DEFAULT_PORT),
            },
            _ => (raw, DEFAULT_PORT),
        }
    }
}

impl From<&DefaultTenant> for TenantCredential {
    fn from(t: &DefaultTenant) -> Self {
        TenantCredential {
            lab_code: t.lab_code.clone(),
            database_host: t.database_host.clone(),
            database_name: t.database_name.clone(),
            database_user: t.database_user.clone(),
            database_secret: t.database_secret.clone(),
        }
    }
}

/// Read side of the registry. `Ok(None)` means the lab code is not registered.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn find_credential(&self, lab_code: &str) -> Result<Option<TenantCredential>, TenantError>;
}

/// Registry backed by the shared registry database.
#[derive(Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
    schema: String,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgRegistryStore {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), REGISTRY_TABLE)
    }

    /// Create the registry schema and table if missing.
    pub async fn ensure_registry_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)))
            .execute(&self.pool)
            .await?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                lab_code TEXT PRIMARY KEY,
                db_host TEXT NOT NULL,
                db_name TEXT NOT NULL,
                db_user TEXT NOT NULL,
                db_password TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.qualified_table()
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert one lab row; an existing row for the same lab code is left untouched.
    /// Returns true when a row was written.
    pub async fn register(&self, credential: &TenantCredential) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (lab_code, db_host, db_name, db_user, db_password) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (lab_code) DO NOTHING",
            self.qualified_table()
        );
        let done = sqlx::query(&sql)
            .bind(&credential.lab_code)
            .bind(&credential.database_host)
            .bind(&credential.database_name)
            .bind(&credential.database_user)
            .bind(&credential.database_secret)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Register the configured default lab when it is not in the registry yet.
    /// Only the registry row is written; the lab's own schema is set up on first request.
    pub async fn seed_default_tenant(&self, default: Option<&DefaultTenant>) -> Result<(), sqlx::Error> {
        let Some(default) = default else {
            tracing::debug!("no complete default lab profile configured, skipping registry seed");
            return Ok(());
        };
        if self.register(&TenantCredential::from(default)).await? {
            tracing::info!(lab_code = %default.lab_code, "registered default lab");
        }
        Ok(())
    }

    /// Liveness of the registry database (used by the readiness route).
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn find_credential(&self, lab_code: &str) -> Result<Option<TenantCredential>, TenantError> {
        let sql = format!(
            "SELECT lab_code, db_host AS database_host, db_name AS database_name, db_user AS database_user, db_password AS database_secret FROM {} WHERE lab_code = $1",
            self.qualified_table()
        );
        sqlx::query_as::<_, TenantCredential>(&sql)
            .bind(lab_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(TenantError::Registry)
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
