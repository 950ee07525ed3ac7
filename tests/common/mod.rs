//! Shared integration-test setup.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber so `RUST_LOG=debug cargo test -- --nocapture`
/// shows the dispatcher loop's logs. Safe to call from every test; only the
/// first call actually installs it.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
