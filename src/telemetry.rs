//! Tracing subscriber setup shared by binaries.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_filter` when it is unset.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A subscriber may already be installed (e.g. by an embedding binary); keep that one.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
