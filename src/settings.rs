//! Process configuration read from the environment (`.env` honoured by the binary).

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Bounds for each lazily created tenant pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection profile for the tenant registered at startup when absent from the registry.
#[derive(Clone, Debug)]
pub struct DefaultTenant {
    pub lab_code: String,
    pub database_host: String,
    pub database_name: String,
    pub database_user: String,
    pub database_secret: String,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub registry_schema: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub pool: PoolSettings,
    pub default_tenant: Option<DefaultTenant>,
    pub default_admin_password: String,
    pub max_body_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_connections: parse_or(&get, "TENANT_POOL_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: parse_or(&get, "TENANT_POOL_MIN_CONNECTIONS", defaults.min_connections)?,
            acquire_timeout: Duration::from_secs(parse_or(
                &get,
                "TENANT_POOL_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )?),
            idle_timeout: Duration::from_secs(parse_or(
                &get,
                "TENANT_POOL_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
        };
        if pool.max_connections == 0 || pool.min_connections > pool.max_connections {
            return Err(SettingsError::Invalid {
                key: "TENANT_POOL_MAX_CONNECTIONS",
                value: format!("max={} min={}", pool.max_connections, pool.min_connections),
            });
        }

        let default_tenant = match (
            get("DEFAULT_LAB_CODE"),
            get("DEFAULT_DB_HOST"),
            get("DEFAULT_DB_NAME"),
            get("DEFAULT_DB_USER"),
            get("DEFAULT_DB_PASSWORD"),
        ) {
            (Some(lab_code), Some(database_host), Some(database_name), Some(database_user), Some(database_secret)) => {
                Some(DefaultTenant {
                    lab_code,
                    database_host,
                    database_name,
                    database_user,
                    database_secret,
                })
            }
            _ => None,
        };

        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/lab_registry".into()),
            registry_schema: get("REGISTRY_SCHEMA").unwrap_or_else(|| "public".into()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            jwt_secret: get("JWT_SECRET").ok_or(SettingsError::Missing("JWT_SECRET"))?,
            pool,
            default_tenant,
            default_admin_password: get("DEFAULT_ADMIN_PASSWORD").unwrap_or_else(|| "admin123".into()),
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", 1024 * 1024)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| SettingsError::Invalid { key, value }),
    }
}
