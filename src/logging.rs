//! Tracing setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; only the first call wins.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Test-friendly init: compact output, `warn` by default.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).without_time().try_init();
}
