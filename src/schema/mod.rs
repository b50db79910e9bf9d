//! Logical lab schema and the synchronizer that applies it to a lab database.

mod lab;
mod migration;
mod types;

pub use lab::{lab_schema, LAB_SCHEMA};
pub use migration::{synchronize_schema, SchemaPlan};
pub use types::*;
