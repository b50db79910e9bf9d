//! HTTP handlers consuming a ready tenant context.

pub mod tenant;
pub use tenant::*;
