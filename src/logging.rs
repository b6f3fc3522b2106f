//! Tracing wire-up helpers.
//!
//! Libraries shouldn't install a global subscriber on behalf of their host,
//! so the only public entry point here is a convenience initializer for
//! binaries/tests that don't already set one up themselves.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber driven by `RUST_LOG` (falling back to
/// `default_filter`). Safe to call more than once — subsequent calls are
/// no-ops if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init();
}

#[cfg(any(test, feature = "test-util"))]
pub fn init_test_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
