//! Tracing setup for tests using the mock server.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber writing through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `mockserve=debug`. Safe to
/// call from every test: only the first call installs anything.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mockserve=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
