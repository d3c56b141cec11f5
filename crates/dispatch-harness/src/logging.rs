#![forbid(unsafe_code)]

//! Tracing setup for tests.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a test-writer `fmt` subscriber once per process.
///
/// The filter comes from `RUST_LOG` when set, otherwise `warn`. Later calls
/// (and calls from other tests) are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::WARN.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
