//! Lab tenancy: per-lab database connections, schema lifecycle and the request gate that
//! hands handlers a ready set of entity bindings.

pub mod auth;
pub mod entity;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod registry;
pub mod response;
pub mod routes;
pub mod schema;
pub mod seed;
pub mod settings;
pub mod state;
pub mod telemetry;
pub mod tenant;

pub use auth::{Identity, TokenDecoder};
pub use entity::{bind_entities, EntityBinding, EntityBindingSet};
pub use error::{AppError, TenantError};
pub use registry::{PgRegistryStore, RegistryStore, TenantCredential};
pub use routes::{common_routes, entity_routes, tenant_routes};
pub use settings::{PoolSettings, Settings};
pub use state::AppState;
pub use tenant::{PgTenantBackend, TenantContext, TenantManager};
