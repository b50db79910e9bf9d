//! Router assembly.

mod common;
mod tenant;

pub use common::common_routes;
pub use tenant::{entity_routes, tenant_routes};
