//! Entity binder: lab tables bound to a specific connection pool.

mod binding;
mod sql;

pub use binding::{bind_entities, BindError, EntityBinding, EntityBindingSet, IncludeDirection, IncludeSpec};
