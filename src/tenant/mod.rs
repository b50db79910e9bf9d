//! Tenant connection and schema lifecycle: per-lab pools, the connection cache and
//! the once-per-process setup of each lab database.

mod backend;
mod connection;
mod manager;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{PgTenantBackend, TenantBackend};
pub use connection::{TenantHandle, TenantPool};
pub use manager::{InitState, TenantContext, TenantManager};
